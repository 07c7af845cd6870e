use super::money::Money;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const ORDER_NUMBER_PREFIX: &str = "ORD";
const ORDER_SEQUENCE_WIDTH: usize = 4;

/// Opaque order identifier, assigned by the store at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for OrderId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

/// Business/fulfillment status shown to staff and customers.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    Pending,
    Processing,
    Failed,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
        }
    }
}

/// Payment lifecycle of an order.
///
/// `payment_status` and `status` are projections of this single value, so
/// the two can never drift apart. A gateway trade number only exists on
/// [`OrderState::Paid`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrderState {
    /// Waiting for the gateway outcome.
    Pending,
    /// Confirmed by the gateway.
    Paid { gateway_trade_no: String },
    /// The gateway reported a failed attempt; a later confirmation may still arrive.
    Declined,
    /// No confirmation before the end of the order's calendar day. Terminal.
    Expired,
}

impl OrderState {
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            Self::Pending => PaymentStatus::Pending,
            Self::Paid { .. } => PaymentStatus::Paid,
            Self::Declined | Self::Expired => PaymentStatus::Failed,
        }
    }

    pub fn status(&self) -> FulfillmentStatus {
        match self {
            Self::Pending | Self::Declined => FulfillmentStatus::Pending,
            Self::Paid { .. } => FulfillmentStatus::Processing,
            Self::Expired => FulfillmentStatus::Failed,
        }
    }

    pub fn gateway_trade_no(&self) -> Option<&str> {
        match self {
            Self::Paid { gateway_trade_no } => Some(gateway_trade_no),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid { .. } => "paid",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }
}

/// The gateway's verdict on a trade, from a verified callback or a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewaySignal {
    Confirmed {
        gateway_trade_no: String,
        merchant_trade_no: Option<String>,
        payment_type: Option<String>,
    },
    Declined {
        merchant_trade_no: Option<String>,
        payment_type: Option<String>,
    },
}

/// What applying a signal did to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged,
    /// The signal contradicts a terminal state and was dropped.
    Ignored(&'static str),
}

impl Transition {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    #[serde(default)]
    pub notes: String,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Price, name, and SKU captured when the order was placed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct LineItem {
    pub product_id: u64,
    pub product_name: String,
    pub product_sku: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
    pub total_price: Money,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: Option<u64>,
    pub customer: Contact,
    pub shipping_method: String,
    pub payment_method: String,
    /// Merchant trade number submitted to the gateway.
    pub transaction_id: Option<String>,
    pub state: OrderState,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub total_amount: Money,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn payment_status(&self) -> PaymentStatus {
        self.state.payment_status()
    }

    pub fn status(&self) -> FulfillmentStatus {
        self.state.status()
    }

    pub fn gateway_trade_no(&self) -> Option<&str> {
        self.state.gateway_trade_no()
    }

    /// Key used to look the trade up at the gateway.
    pub fn gateway_lookup_key(&self) -> &str {
        self.transaction_id
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.order_number)
    }

    /// Applies a gateway verdict.
    ///
    /// This and [`Order::expire`] are the only places the order state moves.
    /// Paid is absorbing: re-delivering a confirmation, or any later signal,
    /// leaves every field untouched.
    pub fn apply_signal(&mut self, signal: GatewaySignal, now: DateTime<Utc>) -> Transition {
        match signal {
            GatewaySignal::Confirmed {
                gateway_trade_no,
                merchant_trade_no,
                payment_type,
            } => match self.state {
                OrderState::Paid { .. } => Transition::Unchanged,
                OrderState::Expired => {
                    Transition::Ignored("confirmation arrived after the order expired")
                }
                OrderState::Pending | OrderState::Declined => {
                    if gateway_trade_no.is_empty() {
                        return Transition::Ignored("confirmation without a gateway trade number");
                    }
                    self.state = OrderState::Paid { gateway_trade_no };
                    self.absorb_payload(merchant_trade_no, payment_type);
                    self.updated_at = now;
                    Transition::Changed
                }
            },
            GatewaySignal::Declined {
                merchant_trade_no,
                payment_type,
            } => match self.state {
                OrderState::Pending => {
                    self.state = OrderState::Declined;
                    self.absorb_payload(merchant_trade_no, payment_type);
                    self.updated_at = now;
                    Transition::Changed
                }
                OrderState::Paid { .. } | OrderState::Declined | OrderState::Expired => {
                    Transition::Unchanged
                }
            },
        }
    }

    /// Moves a still-pending order to its terminal failed state.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Transition {
        if self.state != OrderState::Pending {
            return Transition::Unchanged;
        }
        self.state = OrderState::Expired;
        self.updated_at = now;
        Transition::Changed
    }

    /// Whether `now` has reached the end of the calendar day the order was placed on.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= payment_deadline(self.created_at)
    }

    fn absorb_payload(&mut self, merchant_trade_no: Option<String>, payment_type: Option<String>) {
        if let Some(trade_no) = merchant_trade_no.filter(|t| !t.is_empty()) {
            self.transaction_id = Some(trade_no);
        }
        if let Some(payment_type) = payment_type.filter(|p| !p.is_empty()) {
            self.payment_method = payment_type;
        }
    }
}

/// Last second (UTC) of the calendar day containing `created_at`.
pub fn payment_deadline(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at.date_naive().and_time(NaiveTime::MIN).and_utc() + Duration::seconds(86_399)
}

pub fn order_number_prefix(date: NaiveDate) -> String {
    format!("{}{}", ORDER_NUMBER_PREFIX, date.format("%y%m%d"))
}

/// Next number in the day's sequence, given the highest number issued so far.
pub fn next_order_number(prefix: &str, last: Option<&str>) -> String {
    let next_seq = last
        .and_then(|n| n.strip_prefix(prefix))
        .and_then(|seq| seq.parse::<u32>().ok())
        .map_or(1, |seq| seq + 1);
    format!("{prefix}{next_seq:0width$}", width = ORDER_SEQUENCE_WIDTH)
}

/// Sort key that keeps sequences ordered past the padded width.
pub fn order_number_rank(order_number: &str) -> (usize, &str) {
    (order_number.len(), order_number)
}
