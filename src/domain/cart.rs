use super::money::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: u64,
    pub quantity: u32,
}

/// A customer's cart as owned by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: Option<u64>,
    pub lines: Vec<CartLine>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.quantity == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub sku: Option<String>,
    pub regular_price: Money,
    pub sale_price: Option<Money>,
    #[serde(default)]
    pub weight: Decimal,
}

impl Product {
    /// The price a customer pays right now.
    pub fn effective_price(&self) -> Money {
        self.sale_price.unwrap_or(self.regular_price)
    }
}

/// How a shipping method prices an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShippingRule {
    FlatRate,
    /// Free once the subtotal reaches the threshold.
    FreeShipping { threshold: Option<Money> },
    /// Only offered for subtotals inside the band.
    PriceBased {
        min_order_amount: Option<Money>,
        max_order_amount: Option<Money>,
    },
    /// Only offered for weights inside the band; optionally charged per unit weight.
    WeightBased {
        min_weight: Option<Decimal>,
        max_weight: Option<Decimal>,
        cost_per_unit: Option<Money>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub id: u64,
    pub name: String,
    pub cost: Money,
    pub rule: ShippingRule,
    pub active: bool,
}

impl ShippingMethod {
    /// Cost of shipping an order, or `None` when this method does not apply to it.
    pub fn cost_for(&self, subtotal: Money, total_weight: Decimal) -> Option<Money> {
        if !self.active {
            return None;
        }

        match &self.rule {
            ShippingRule::FlatRate => Some(self.cost),
            ShippingRule::FreeShipping { threshold } => match threshold {
                Some(threshold) if subtotal >= *threshold => Some(Money::ZERO),
                _ => Some(self.cost),
            },
            ShippingRule::PriceBased {
                min_order_amount,
                max_order_amount,
            } => {
                if min_order_amount.is_some_and(|min| subtotal < min)
                    || max_order_amount.is_some_and(|max| subtotal > max)
                {
                    return None;
                }
                Some(self.cost)
            }
            ShippingRule::WeightBased {
                min_weight,
                max_weight,
                cost_per_unit,
            } => {
                if min_weight.is_some_and(|min| total_weight < min)
                    || max_weight.is_some_and(|max| total_weight > max)
                {
                    return None;
                }
                Some(match cost_per_unit {
                    Some(per_unit) => Money::new(per_unit.value() * total_weight),
                    None => self.cost,
                })
            }
        }
    }
}
