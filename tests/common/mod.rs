#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::process::Command;
use storepay::config::GatewayConfig;
use storepay::domain::money::Money;
use storepay::domain::order::{Contact, LineItem, Order, OrderId, OrderState};
use storepay::gateway::{FormFields, GatewayClient};

pub const MERCHANT_ID: &str = "3002607";
pub const HASH_KEY: &str = "pwFHCqoQZGmho4w6";
pub const HASH_IV: &str = "EkRm7iFT261dpevs";

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig::sandbox(MERCHANT_ID, HASH_KEY, HASH_IV).unwrap()
}

pub fn gateway() -> GatewayClient {
    GatewayClient::new(gateway_config()).unwrap()
}

/// A pending order placed at 2024-06-01T10:00:00Z.
pub fn pending_order(id: u64) -> Order {
    let created = at(2024, 6, 1, 10, 0, 0);
    Order {
        id: OrderId(id),
        order_number: format!("ORD240601{id:04}"),
        user_id: Some(7),
        customer: Contact {
            first_name: "Mei".into(),
            last_name: "Lin".into(),
            email: "mei@example.com".into(),
            phone: "0912345678".into(),
            address: "1 Roosevelt Rd".into(),
            notes: String::new(),
        },
        shipping_method: "Home delivery".into(),
        payment_method: "ecpay".into(),
        transaction_id: Some(GatewayClient::generate_trade_no(OrderId(id), created)),
        state: OrderState::Pending,
        subtotal: Money::new(dec!(1000)),
        shipping_fee: Money::new(dec!(60)),
        total_amount: Money::new(dec!(1060)),
        items: vec![LineItem {
            product_id: 1,
            product_name: "Oolong tea".into(),
            product_sku: Some("TEA-001".into()),
            unit_price: Money::new(dec!(500)),
            quantity: 2,
            total_price: Money::new(dec!(1000)),
        }],
        created_at: created,
        updated_at: created,
    }
}

/// Builds a form and signs it the way the gateway does.
pub fn signed_form(pairs: &[(&str, &str)]) -> FormFields {
    let mut fields: FormFields = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mac = gateway().compute_mac(fields.iter());
    fields.insert("CheckMacValue".into(), mac);
    fields
}

/// A successful payment notification for `order`.
pub fn success_form(order: &Order) -> FormFields {
    let order_id = order.id.to_string();
    signed_form(&[
        ("MerchantID", MERCHANT_ID),
        ("MerchantTradeNo", order.transaction_id.as_deref().unwrap_or_default()),
        ("RtnCode", "1"),
        ("RtnMsg", "Succeeded"),
        ("TradeNo", "2406011000001"),
        ("TradeAmt", "1060"),
        ("PaymentDate", "2024/06/01 18:05:00"),
        ("PaymentType", "Credit_CreditCard"),
        ("CustomField1", order_id.as_str()),
    ])
}

pub fn encode_form(fields: &FormFields) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter())
        .finish()
}

/// The binary with gateway credentials set and nothing inherited from a local `.env`.
pub fn storepay_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo_bin!("storepay"));
    cmd.env("ECPAY_MERCHANT_ID", MERCHANT_ID)
        .env("ECPAY_HASH_KEY", HASH_KEY)
        .env("ECPAY_HASH_IV", HASH_IV)
        .env("ECPAY_BASE_URL", "http://127.0.0.1:9")
        .env("ECPAY_TIMEOUT_SECS", "1")
        .env("RUST_LOG", "warn");
    cmd
}
