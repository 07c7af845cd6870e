use crate::domain::cart::CartId;
use crate::domain::money::Money;
use crate::domain::order::{
    Contact, LineItem, Order, OrderId, OrderState, next_order_number, order_number_prefix,
};
use crate::domain::ports::{CartStoreRef, CatalogRef, ClockRef, OrderStoreRef};
use crate::error::{PaymentError, Result};
use crate::gateway::{CheckoutParams, GatewayClient, ReturnUrls};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

const INITIAL_PAYMENT_METHOD: &str = "ecpay";
const MAX_INSERT_ATTEMPTS: usize = 3;

/// What the customer submitted on the checkout form.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub cart_id: CartId,
    pub contact: Contact,
    /// Raw form value; parsed and validated here.
    pub shipping_method_id: String,
}

/// The persisted order plus everything the browser needs to post to the gateway.
#[derive(Debug, Clone)]
pub struct CheckoutSubmission {
    pub order_id: OrderId,
    pub order_number: String,
    pub action_url: String,
    pub params: CheckoutParams,
}

/// Turns a cart into a pending order and a signed gateway submission.
pub struct CheckoutInitiator {
    orders: OrderStoreRef,
    carts: CartStoreRef,
    catalog: CatalogRef,
    gateway: Arc<GatewayClient>,
    clock: ClockRef,
    public_base_url: Url,
}

impl CheckoutInitiator {
    pub fn new(
        orders: OrderStoreRef,
        carts: CartStoreRef,
        catalog: CatalogRef,
        gateway: Arc<GatewayClient>,
        clock: ClockRef,
        public_base_url: Url,
    ) -> Self {
        Self {
            orders,
            carts,
            catalog,
            gateway,
            clock,
            public_base_url,
        }
    }

    /// Validates the request, persists the order, clears the cart, and signs
    /// the gateway submission.
    ///
    /// Every validation failure is reported before anything is written.
    #[instrument(skip(self, request), fields(cart_id = request.cart_id.0))]
    pub async fn initiate(&self, request: CheckoutRequest) -> Result<CheckoutSubmission> {
        let cart = self
            .carts
            .get(request.cart_id)
            .await?
            .ok_or_else(|| PaymentError::validation("cart not found"))?;
        if cart.is_empty() {
            return Err(PaymentError::validation("cart is empty"));
        }
        validate_contact(&request.contact)?;

        let method_id = parse_shipping_method_id(&request.shipping_method_id)?;
        let method = self
            .catalog
            .shipping_method(method_id)
            .await?
            .ok_or_else(|| PaymentError::validation(format!("unknown shipping method {method_id}")))?;

        let mut items = Vec::with_capacity(cart.lines.len());
        let mut total_weight = Decimal::ZERO;
        for line in cart.lines.iter().filter(|line| line.quantity > 0) {
            let Some(product) = self.catalog.product(line.product_id).await? else {
                debug!(product_id = line.product_id, "Skipping product no longer in catalog");
                continue;
            };
            let unit_price = product.effective_price();
            total_weight += product.weight * Decimal::from(line.quantity);
            items.push(LineItem {
                product_id: product.id,
                product_name: product.name,
                product_sku: product.sku,
                unit_price,
                quantity: line.quantity,
                total_price: unit_price * line.quantity,
            });
        }
        if items.is_empty() {
            return Err(PaymentError::validation("none of the cart's products are available"));
        }

        let subtotal: Money = items.iter().map(|item| item.total_price).sum();
        let shipping_fee = method.cost_for(subtotal, total_weight).ok_or_else(|| {
            PaymentError::validation(format!(
                "shipping method '{}' does not apply to this order",
                method.name
            ))
        })?;

        let now = self.clock.now();
        let id = self.orders.allocate_id().await?;
        let mut order = Order {
            id,
            order_number: String::new(),
            user_id: cart.user_id,
            customer: request.contact,
            shipping_method: method.name,
            payment_method: INITIAL_PAYMENT_METHOD.to_string(),
            transaction_id: Some(GatewayClient::generate_trade_no(id, now)),
            state: OrderState::Pending,
            subtotal,
            shipping_fee,
            total_amount: subtotal + shipping_fee,
            items,
            created_at: now,
            updated_at: now,
        };

        self.insert_with_fresh_number(&mut order, now).await?;

        let urls = ReturnUrls::for_order(&self.public_base_url, order.id);
        let params = self.gateway.build_checkout_params(&order, &urls, now)?;

        self.carts.clear(request.cart_id).await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order created, awaiting payment"
        );

        Ok(CheckoutSubmission {
            order_id: order.id,
            order_number: order.order_number,
            action_url: self.gateway.checkout_url(),
            params,
        })
    }

    /// Picks the next free order number for the day and inserts the order,
    /// retrying when a concurrent checkout claims the same number first.
    async fn insert_with_fresh_number(&self, order: &mut Order, now: DateTime<Utc>) -> Result<()> {
        let prefix = order_number_prefix(now.date_naive());
        let mut attempt = 0;
        loop {
            attempt += 1;
            order.order_number = self.next_free_order_number(&prefix).await?;
            match self.orders.insert(order.clone()).await {
                Ok(()) => return Ok(()),
                Err(PaymentError::Conflict(reason)) if attempt < MAX_INSERT_ATTEMPTS => {
                    warn!(%reason, attempt, "Order number taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn next_free_order_number(&self, prefix: &str) -> Result<String> {
        let last = self.orders.last_order_number(prefix).await?;
        let mut candidate = next_order_number(prefix, last.as_deref());
        while self.orders.order_number_exists(&candidate).await? {
            candidate = next_order_number(prefix, Some(&candidate));
        }
        Ok(candidate)
    }
}

fn parse_shipping_method_id(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PaymentError::validation("shipping method is required"));
    }
    raw.parse()
        .map_err(|_| PaymentError::validation(format!("invalid shipping method '{raw}'")))
}

fn validate_contact(contact: &Contact) -> Result<()> {
    let required = [
        ("first name", &contact.first_name),
        ("last name", &contact.last_name),
        ("email", &contact.email),
        ("phone", &contact.phone),
        ("address", &contact.address),
    ];
    if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(PaymentError::validation(format!("{name} is required")));
    }
    if !contact.email.contains('@') {
        return Err(PaymentError::validation("email is invalid"));
    }
    Ok(())
}
