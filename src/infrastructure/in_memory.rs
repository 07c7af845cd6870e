use crate::domain::cart::{Cart, CartId, Product, ShippingMethod};
use crate::domain::order::{Order, OrderId, PaymentStatus, order_number_rank};
use crate::domain::ports::{CartStore, Catalog, OrderStore, StateChange};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory order store.
///
/// All reads and the batched `commit` go through one `RwLock`, so a commit is
/// atomic with respect to every other operation on the store.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn allocate_id(&self) -> Result<OrderId> {
        Ok(OrderId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(PaymentError::Conflict(format!("order {} already exists", order.id)));
        }
        if orders.values().any(|o| o.order_number == order.order_number) {
            return Err(PaymentError::Conflict(format!(
                "order number {} already exists",
                order.order_number
            )));
        }
        // Keep the id counter ahead of explicitly numbered inserts.
        self.next_id.fetch_max(order.id.0, Ordering::SeqCst);
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|o| o.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn order_number_exists(&self, order_number: &str) -> Result<bool> {
        let orders = self.orders.read().await;
        Ok(orders.values().any(|o| o.order_number == order_number))
    }

    async fn last_order_number(&self, prefix: &str) -> Result<Option<String>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .map(|o| o.order_number.as_str())
            .filter(|n| n.starts_with(prefix))
            .max_by(|a, b| order_number_rank(a).cmp(&order_number_rank(b)))
            .map(str::to_string))
    }

    async fn pending_oldest_first(&self, limit: usize) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut pending: Vec<Order> = orders
            .values()
            .filter(|o| o.payment_status() == PaymentStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|o| (o.created_at, o.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn commit(&self, changes: Vec<StateChange>) -> Result<Vec<OrderId>> {
        let mut orders = self.orders.write().await;
        let mut written = Vec::with_capacity(changes.len());
        for change in changes {
            let id = change.order.id;
            match orders.get(&id) {
                Some(current) if current.state == change.expected => {
                    orders.insert(id, change.order);
                    written.push(id);
                }
                _ => {}
            }
        }
        Ok(written)
    }
}

/// In-memory carts, keyed by cart id.
#[derive(Default, Clone)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<CartId, Cart>>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, cart: Cart) {
        self.carts.write().await.insert(cart.id, cart);
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get(&self, cart_id: CartId) -> Result<Option<Cart>> {
        let carts = self.carts.read().await;
        Ok(carts.get(&cart_id).cloned())
    }

    async fn clear(&self, cart_id: CartId) -> Result<()> {
        let mut carts = self.carts.write().await;
        if let Some(cart) = carts.get_mut(&cart_id) {
            cart.lines.clear();
        }
        Ok(())
    }
}

/// In-memory product and shipping-method catalog.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<u64, Product>>>,
    shipping_methods: Arc<RwLock<HashMap<u64, ShippingMethod>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_product(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn remove_product(&self, product_id: u64) {
        self.products.write().await.remove(&product_id);
    }

    pub async fn put_shipping_method(&self, method: ShippingMethod) {
        self.shipping_methods.write().await.insert(method.id, method);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, product_id: u64) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(&product_id).cloned())
    }

    async fn shipping_method(&self, method_id: u64) -> Result<Option<ShippingMethod>> {
        Ok(self.shipping_methods.read().await.get(&method_id).cloned())
    }
}

/// Products, shipping methods, and carts loaded from a JSON file at startup.
#[derive(Debug, Default, Deserialize)]
pub struct StorefrontSeed {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub shipping_methods: Vec<ShippingMethod>,
    #[serde(default)]
    pub carts: Vec<Cart>,
}

impl StorefrontSeed {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub async fn load_into(self, catalog: &InMemoryCatalog, carts: &InMemoryCartStore) {
        for product in self.products {
            catalog.put_product(product).await;
        }
        for method in self.shipping_methods {
            catalog.put_shipping_method(method).await;
        }
        for cart in self.carts {
            carts.put(cart).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::order::{Contact, OrderState};
    use chrono::{Duration, TimeZone, Utc};

    fn order(id: u64, number: &str, minutes: i64) -> Order {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap() + Duration::minutes(minutes);
        Order {
            id: OrderId(id),
            order_number: number.into(),
            user_id: None,
            customer: Contact {
                first_name: "A".into(),
                last_name: "B".into(),
                email: "a@b.c".into(),
                phone: "1".into(),
                address: "x".into(),
                notes: String::new(),
            },
            shipping_method: "Courier".into(),
            payment_method: "ecpay".into(),
            transaction_id: Some(format!("EC{id:06}")),
            state: OrderState::Pending,
            subtotal: Money::ZERO,
            shipping_fee: Money::ZERO,
            total_amount: Money::ZERO,
            items: vec![],
            created_at: created,
            updated_at: created,
        }
    }

    #[tokio::test]
    async fn test_in_memory_order_store() {
        let store = InMemoryOrderStore::new();
        let o = order(1, "ORD2406010001", 0);
        store.insert(o.clone()).await.unwrap();

        assert_eq!(store.get(OrderId(1)).await.unwrap(), Some(o.clone()));
        assert_eq!(store.find_by_transaction_id("EC000001").await.unwrap(), Some(o));
        assert!(store.get(OrderId(2)).await.unwrap().is_none());
        assert!(store.order_number_exists("ORD2406010001").await.unwrap());
        assert_eq!(store.allocate_id().await.unwrap(), OrderId(2));
    }

    #[tokio::test]
    async fn test_duplicate_order_number_rejected() {
        let store = InMemoryOrderStore::new();
        store.insert(order(1, "ORD2406010001", 0)).await.unwrap();
        let result = store.insert(order(2, "ORD2406010001", 0)).await;
        assert!(matches!(result, Err(PaymentError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_pending_oldest_first_respects_limit() {
        let store = InMemoryOrderStore::new();
        store.insert(order(1, "ORD2406010001", 30)).await.unwrap();
        store.insert(order(2, "ORD2406010002", 10)).await.unwrap();
        store.insert(order(3, "ORD2406010003", 20)).await.unwrap();
        let mut paid = order(4, "ORD2406010004", 0);
        paid.state = OrderState::Paid {
            gateway_trade_no: "T".into(),
        };
        store.insert(paid).await.unwrap();

        let pending = store.pending_oldest_first(2).await.unwrap();
        let ids: Vec<u64> = pending.iter().map(|o| o.id.0).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_commit_skips_stale_changes() {
        let store = InMemoryOrderStore::new();
        store.insert(order(1, "ORD2406010001", 0)).await.unwrap();
        store.insert(order(2, "ORD2406010002", 0)).await.unwrap();

        let mut paid = order(1, "ORD2406010001", 0);
        paid.state = OrderState::Paid {
            gateway_trade_no: "T1".into(),
        };
        let mut stale = order(2, "ORD2406010002", 0);
        stale.state = OrderState::Expired;

        let written = store
            .commit(vec![
                StateChange {
                    expected: OrderState::Pending,
                    order: paid,
                },
                StateChange {
                    expected: OrderState::Declined,
                    order: stale,
                },
            ])
            .await
            .unwrap();

        assert_eq!(written, vec![OrderId(1)]);
        assert_eq!(
            store.get(OrderId(2)).await.unwrap().unwrap().state,
            OrderState::Pending
        );
    }

    #[tokio::test]
    async fn test_last_order_number_orders_past_padding() {
        let store = InMemoryOrderStore::new();
        store.insert(order(1, "ORD2406019999", 0)).await.unwrap();
        store.insert(order(2, "ORD24060110000", 0)).await.unwrap();
        store.insert(order(3, "ORD2406020001", 0)).await.unwrap();
        assert_eq!(
            store.last_order_number("ORD240601").await.unwrap().as_deref(),
            Some("ORD24060110000")
        );
        assert_eq!(store.last_order_number("ORD240603").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cart_clear() {
        let carts = InMemoryCartStore::new();
        carts
            .put(Cart {
                id: CartId(1),
                user_id: None,
                lines: vec![crate::domain::cart::CartLine {
                    product_id: 1,
                    quantity: 2,
                }],
            })
            .await;
        carts.clear(CartId(1)).await.unwrap();
        assert!(carts.get(CartId(1)).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seed_file_populates_catalog_and_carts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storefront.json");
        std::fs::write(
            &path,
            r#"{
                "products": [
                    {"id": 1, "name": "Oolong tea", "sku": "TEA-001", "regular_price": "500", "sale_price": null}
                ],
                "shipping_methods": [
                    {"id": 3, "name": "Home delivery", "cost": "60", "rule": {"type": "flat_rate"}, "active": true}
                ],
                "carts": [
                    {"id": 1, "user_id": null, "lines": [{"product_id": 1, "quantity": 2}]}
                ]
            }"#,
        )
        .unwrap();

        let catalog = InMemoryCatalog::new();
        let carts = InMemoryCartStore::new();
        StorefrontSeed::from_path(&path)
            .unwrap()
            .load_into(&catalog, &carts)
            .await;

        let product = catalog.product(1).await.unwrap().unwrap();
        assert_eq!(product.effective_price(), Money::new(rust_decimal_macros::dec!(500)));
        assert_eq!(catalog.shipping_method(3).await.unwrap().unwrap().name, "Home delivery");
        assert_eq!(carts.get(CartId(1)).await.unwrap().unwrap().lines.len(), 1);
    }

    #[test]
    fn test_missing_seed_file_is_an_io_error() {
        let result = StorefrontSeed::from_path("/nonexistent/storefront.json");
        assert!(matches!(result, Err(PaymentError::IoError(_))));
    }
}
