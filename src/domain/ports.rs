use super::cart::{Cart, CartId, Product, ShippingMethod};
use super::order::{Order, OrderId, OrderState};
use crate::error::Result;
use crate::gateway::TradeStatusReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A guarded write: `order` replaces the stored record only while the stored
/// state still equals `expected`.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub expected: OrderState,
    pub order: Order,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Reserves a fresh order id.
    async fn allocate_id(&self) -> Result<OrderId>;
    /// Persists a new order with its items. Fails with `Conflict` on a duplicate id or order number.
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>>;
    async fn order_number_exists(&self, order_number: &str) -> Result<bool>;
    /// Highest order number starting with `prefix`.
    async fn last_order_number(&self, prefix: &str) -> Result<Option<String>>;
    /// Orders still awaiting a gateway outcome, earliest first.
    async fn pending_oldest_first(&self, limit: usize) -> Result<Vec<Order>>;
    /// Applies all changes in one atomic write and returns the ids actually written.
    ///
    /// A change whose `expected` state no longer matches the stored one is skipped.
    async fn commit(&self, changes: Vec<StateChange>) -> Result<Vec<OrderId>>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get(&self, cart_id: CartId) -> Result<Option<Cart>>;
    async fn clear(&self, cart_id: CartId) -> Result<()>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, product_id: u64) -> Result<Option<Product>>;
    async fn shipping_method(&self, method_id: u64) -> Result<Option<ShippingMethod>>;
}

/// Outbound trade-status lookups.
///
/// Never fails: transport and parse problems surface as `None`, meaning
/// "unknown, ask again later". `at` stamps the signed request.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn query_trade_status(
        &self,
        merchant_trade_no: &str,
        at: DateTime<Utc>,
    ) -> Option<TradeStatusReport>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type CartStoreRef = Arc<dyn CartStore>;
pub type CatalogRef = Arc<dyn Catalog>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type ClockRef = Arc<dyn Clock>;
