//! Typed views of the gateway's form messages.
//!
//! The wire format is a flat string map; these structs are what the rest of
//! the crate sees once a message has crossed the boundary.

use crate::domain::order::{GatewaySignal, OrderId};
use std::collections::BTreeMap;

pub type FormFields = BTreeMap<String, String>;

pub const SUCCESS_CODE: &str = "1";

/// Fields posted to the gateway's checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutParams {
    pub merchant_id: String,
    pub merchant_trade_no: String,
    pub merchant_trade_date: String,
    pub total_amount: i64,
    pub trade_desc: String,
    pub item_name: String,
    pub return_url: String,
    pub order_result_url: String,
    pub client_back_url: String,
    pub custom_fields: [String; 4],
    pub check_mac_value: String,
}

impl CheckoutParams {
    /// Every field the gateway signs, in protocol order.
    pub fn unsigned_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("MerchantID", self.merchant_id.clone()),
            ("MerchantTradeNo", self.merchant_trade_no.clone()),
            ("MerchantTradeDate", self.merchant_trade_date.clone()),
            ("PaymentType", "aio".to_string()),
            ("TotalAmount", self.total_amount.to_string()),
            ("TradeDesc", self.trade_desc.clone()),
            ("ItemName", self.item_name.clone()),
            ("ReturnURL", self.return_url.clone()),
            ("ChoosePayment", "Credit".to_string()),
            ("EncryptType", "1".to_string()),
            ("OrderResultURL", self.order_result_url.clone()),
            ("ClientBackURL", self.client_back_url.clone()),
            ("NeedExtraPaidInfo", "Y".to_string()),
            ("IgnorePayment", String::new()),
            ("PlatformID", String::new()),
            ("InvoiceMark", "N".to_string()),
            ("CustomField1", self.custom_fields[0].clone()),
            ("CustomField2", self.custom_fields[1].clone()),
            ("CustomField3", self.custom_fields[2].clone()),
            ("CustomField4", self.custom_fields[3].clone()),
        ]
    }

    /// The full submission, `CheckMacValue` last.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = self.unsigned_fields();
        fields.push(("CheckMacValue", self.check_mac_value.clone()));
        fields
    }
}

/// Payment result posted back by the gateway, server-to-server or via the browser.
///
/// Only meaningful after its MAC has been verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    pub merchant_trade_no: Option<String>,
    pub rtn_code: Option<String>,
    pub rtn_msg: Option<String>,
    pub trade_no: Option<String>,
    pub trade_amt: Option<String>,
    pub payment_date: Option<String>,
    pub payment_type: Option<String>,
    pub custom_fields: [Option<String>; 4],
}

impl CallbackPayload {
    pub fn from_fields(fields: &FormFields) -> Self {
        Self {
            merchant_trade_no: field(fields, "MerchantTradeNo"),
            rtn_code: field(fields, "RtnCode"),
            rtn_msg: field(fields, "RtnMsg"),
            trade_no: field(fields, "TradeNo"),
            trade_amt: field(fields, "TradeAmt"),
            payment_date: field(fields, "PaymentDate"),
            payment_type: field(fields, "PaymentType"),
            custom_fields: [
                field(fields, "CustomField1"),
                field(fields, "CustomField2"),
                field(fields, "CustomField3"),
                field(fields, "CustomField4"),
            ],
        }
    }

    pub fn is_success(&self) -> bool {
        self.rtn_code.as_deref() == Some(SUCCESS_CODE)
    }

    /// Order id carried in `CustomField1`, if it is a plain number.
    pub fn order_id_hint(&self) -> Option<OrderId> {
        self.custom_fields[0]
            .as_deref()
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|v| v.parse().ok())
    }

    pub fn signal(&self) -> GatewaySignal {
        if self.is_success() {
            GatewaySignal::Confirmed {
                gateway_trade_no: self.trade_no.clone().unwrap_or_default(),
                merchant_trade_no: self.merchant_trade_no.clone(),
                payment_type: self.payment_type.clone(),
            }
        } else {
            GatewaySignal::Declined {
                merchant_trade_no: self.merchant_trade_no.clone(),
                payment_type: self.payment_type.clone(),
            }
        }
    }
}

/// Answer from the trade-status query endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeStatusReport {
    pub merchant_trade_no: Option<String>,
    pub trade_no: Option<String>,
    pub rtn_code: Option<String>,
    pub trade_status: Option<String>,
    pub rtn_msg: Option<String>,
    pub trade_amt: Option<String>,
    pub payment_type: Option<String>,
}

impl TradeStatusReport {
    pub fn from_fields(fields: &FormFields) -> Self {
        Self {
            merchant_trade_no: field(fields, "MerchantTradeNo"),
            trade_no: field(fields, "TradeNo"),
            rtn_code: field(fields, "RtnCode"),
            trade_status: field(fields, "TradeStatus"),
            rtn_msg: field(fields, "RtnMsg"),
            trade_amt: field(fields, "TradeAmt"),
            payment_type: field(fields, "PaymentType"),
        }
    }

    pub fn is_success(&self) -> bool {
        self.rtn_code.as_deref() == Some(SUCCESS_CODE)
            || self.trade_status.as_deref() == Some(SUCCESS_CODE)
    }

    /// The verdict this report carries, or `None` when it cannot be trusted
    /// to settle the order (success reported without a gateway trade number).
    pub fn signal(&self) -> Option<GatewaySignal> {
        if self.is_success() {
            let trade_no = self.trade_no.clone().filter(|t| !t.is_empty())?;
            Some(GatewaySignal::Confirmed {
                gateway_trade_no: trade_no,
                merchant_trade_no: self.merchant_trade_no.clone(),
                payment_type: self.payment_type.clone(),
            })
        } else {
            Some(GatewaySignal::Declined {
                merchant_trade_no: self.merchant_trade_no.clone(),
                payment_type: self.payment_type.clone(),
            })
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.rtn_msg.as_deref()
    }
}

fn field(fields: &FormFields, name: &str) -> Option<String> {
    fields.get(name).map(|v| v.trim().to_string())
}
