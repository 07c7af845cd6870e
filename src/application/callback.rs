use crate::domain::order::{Order, OrderState, Transition};
use crate::domain::ports::{ClockRef, OrderStoreRef, StateChange};
use crate::error::{PaymentError, Result};
use crate::gateway::{CallbackPayload, FormFields, GatewayClient};
use std::sync::Arc;
use tracing::{info, instrument, warn};

const MAX_COMMIT_ATTEMPTS: usize = 5;

/// How a gateway result reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackChannel {
    /// Server-to-server notification; the gateway retries until it reads `1|OK`.
    ServerNotify,
    /// The customer's browser, posting the same fields after payment.
    BrowserRedirect,
}

impl CallbackChannel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::ServerNotify => "server_notify",
            Self::BrowserRedirect => "browser_redirect",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidMac,
    OrderNotFound,
    MissingTradeNo,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidMac => "CheckMacValueError",
            Self::OrderNotFound => "OrderNotFound",
            Self::MissingTradeNo => "MissingTradeNo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Accepted {
        order: Box<Order>,
        transition: Transition,
    },
    Rejected(RejectReason),
}

impl CallbackOutcome {
    /// The exact body the gateway expects back.
    pub fn token(&self) -> String {
        match self {
            Self::Accepted { .. } => "1|OK".to_string(),
            Self::Rejected(reason) => format!("0|{}", reason.as_str()),
        }
    }

    pub fn order(&self) -> Option<&Order> {
        match self {
            Self::Accepted { order, .. } => Some(order),
            Self::Rejected(_) => None,
        }
    }
}

/// Applies gateway payment results to orders.
pub struct CallbackHandler {
    orders: OrderStoreRef,
    gateway: Arc<GatewayClient>,
    clock: ClockRef,
}

impl CallbackHandler {
    pub fn new(orders: OrderStoreRef, gateway: Arc<GatewayClient>, clock: ClockRef) -> Self {
        Self {
            orders,
            gateway,
            clock,
        }
    }

    /// Verifies and applies one gateway result.
    ///
    /// Safe to call any number of times with the same fields: once an order
    /// is paid, further deliveries change nothing and still answer `1|OK`.
    /// Only storage failures surface as `Err`.
    #[instrument(skip(self, form), fields(channel = channel.as_str()))]
    pub async fn handle_notification(
        &self,
        form: &FormFields,
        channel: CallbackChannel,
    ) -> Result<CallbackOutcome> {
        if !self.gateway.verify_mac(form) {
            warn!(
                merchant_trade_no = form.get("MerchantTradeNo").map(String::as_str),
                "Rejected callback with invalid CheckMacValue"
            );
            return Ok(CallbackOutcome::Rejected(RejectReason::InvalidMac));
        }

        let payload = CallbackPayload::from_fields(form);
        let Some(mut order) = self.resolve_order(&payload).await? else {
            warn!(
                merchant_trade_no = payload.merchant_trade_no.as_deref(),
                custom_field_1 = payload.custom_fields[0].as_deref(),
                "Callback for unknown order"
            );
            return Ok(CallbackOutcome::Rejected(RejectReason::OrderNotFound));
        };

        // A paid order absorbs every later signal, complete or not.
        if payload.is_success()
            && !matches!(order.state, OrderState::Paid { .. })
            && payload.trade_no.as_deref().is_none_or(str::is_empty)
        {
            warn!(order_id = %order.id, "Success callback without TradeNo");
            return Ok(CallbackOutcome::Rejected(RejectReason::MissingTradeNo));
        }

        let signal = payload.signal();
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let expected = order.state.clone();
            let transition = order.apply_signal(signal.clone(), self.clock.now());
            match transition {
                Transition::Changed => {
                    let written = self
                        .orders
                        .commit(vec![StateChange {
                            expected,
                            order: order.clone(),
                        }])
                        .await?;
                    if written.contains(&order.id) {
                        info!(
                            order_id = %order.id,
                            payment_status = order.payment_status().as_str(),
                            status = order.status().as_str(),
                            rtn_code = payload.rtn_code.as_deref(),
                            "Payment result applied"
                        );
                        return Ok(accepted(order, transition));
                    }
                    // Someone else moved the order first; re-read and re-apply.
                    order = self
                        .orders
                        .get(order.id)
                        .await?
                        .ok_or_else(|| PaymentError::NotFound(format!("order {}", order.id)))?;
                }
                Transition::Unchanged => return Ok(accepted(order, transition)),
                Transition::Ignored(reason) => {
                    warn!(
                        order_id = %order.id,
                        state = order.state.label(),
                        reason,
                        "Payment result ignored; needs manual follow-up"
                    );
                    return Ok(accepted(order, transition));
                }
            }
        }

        Err(PaymentError::Conflict(format!(
            "order {} kept changing while applying a payment result",
            order.id
        )))
    }

    async fn resolve_order(&self, payload: &CallbackPayload) -> Result<Option<Order>> {
        if let Some(id) = payload.order_id_hint()
            && let Some(order) = self.orders.get(id).await?
        {
            return Ok(Some(order));
        }
        match payload.merchant_trade_no.as_deref().filter(|t| !t.is_empty()) {
            Some(trade_no) => self.orders.find_by_transaction_id(trade_no).await,
            None => Ok(None),
        }
    }
}

fn accepted(order: Order, transition: Transition) -> CallbackOutcome {
    CallbackOutcome::Accepted {
        order: Box::new(order),
        transition,
    }
}
