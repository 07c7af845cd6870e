use super::mac::{self, CHECK_MAC_FIELD};
use super::messages::{CheckoutParams, FormFields, TradeStatusReport};
use crate::config::GatewayConfig;
use crate::domain::order::{Order, OrderId};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use url::Url;

const CHECKOUT_PATH: &str = "/Cashier/AioCheckOut/V5";
const QUERY_PATH: &str = "/Cashier/QueryTradeInfo/V5";
const TRADE_NO_PREFIX: &str = "EC";
const ITEM_NAME_SEPARATOR: &str = "#";

/// Where the gateway sends the customer and its notifications for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnUrls {
    pub return_url: String,
    pub order_result_url: String,
    pub client_back_url: String,
}

impl ReturnUrls {
    pub fn for_order(public_base_url: &Url, order_id: OrderId) -> Self {
        let base = public_base_url.as_str().trim_end_matches('/');
        Self {
            return_url: format!("{base}/payments/ecpay/notify"),
            order_result_url: format!("{base}/payments/ecpay/result/{order_id}"),
            client_back_url: format!("{base}/"),
        }
    }
}

/// Client for the gateway's all-in-one checkout protocol.
///
/// Holds only configuration and a pooled HTTP client; everything else is a
/// pure function of its inputs.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    http: reqwest::Client,
}

impl GatewayClient {
    /// Fails only when the configuration is unusable (blank credentials).
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::InternalError(Box::new(e)))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Page the customer's browser posts [`CheckoutParams`] to.
    pub fn checkout_url(&self) -> String {
        self.endpoint(CHECKOUT_PATH)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.as_str().trim_end_matches('/'), path)
    }

    pub fn compute_mac<I, K, V>(&self, fields: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        mac::compute_mac(fields, &self.config.hash_key, &self.config.hash_iv)
    }

    /// Checks a received message's `CheckMacValue`. Fails closed.
    pub fn verify_mac(&self, fields: &FormFields) -> bool {
        let Some(received) = fields.get(CHECK_MAC_FIELD) else {
            return false;
        };
        if received.is_empty() {
            return false;
        }
        let expected = self.compute_mac(fields.iter());
        mac::mac_matches(&expected, received)
    }

    /// `YYYY/MM/DD HH:MM:SS` in the gateway's local time.
    pub fn format_trade_date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.config.trade_date_offset)
            .format("%Y/%m/%d %H:%M:%S")
            .to_string()
    }

    /// Merchant trade number for one submission of an order.
    pub fn generate_trade_no(order_id: OrderId, at: DateTime<Utc>) -> String {
        format!("{TRADE_NO_PREFIX}{:06}{}", order_id.0, at.timestamp())
    }

    /// Assembles and signs the checkout submission for a persisted order.
    pub fn build_checkout_params(
        &self,
        order: &Order,
        urls: &ReturnUrls,
        at: DateTime<Utc>,
    ) -> Result<CheckoutParams> {
        let merchant_trade_no = order
            .transaction_id
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PaymentError::validation(format!("order {} has no merchant trade number", order.id))
            })?;

        let item_name = order
            .items
            .iter()
            .map(|item| format!("{} x {}", item.product_name, item.quantity))
            .collect::<Vec<_>>()
            .join(ITEM_NAME_SEPARATOR);

        let mut params = CheckoutParams {
            merchant_id: self.config.merchant_id.clone(),
            merchant_trade_no,
            merchant_trade_date: self.format_trade_date(at),
            total_amount: order.total_amount.whole_units()?,
            trade_desc: format!("Order #{}", order.order_number),
            item_name,
            return_url: urls.return_url.clone(),
            order_result_url: urls.order_result_url.clone(),
            client_back_url: urls.client_back_url.clone(),
            custom_fields: [
                order.id.to_string(),
                order.customer.full_name(),
                order.customer.email.clone(),
                order.customer.phone.clone(),
            ],
            check_mac_value: String::new(),
        };
        params.check_mac_value = self.compute_mac(params.unsigned_fields());
        Ok(params)
    }

    /// Asks the gateway what happened to a trade.
    ///
    /// Returns `None` on any transport error, non-success status, unparsable
    /// body, or a body whose MAC does not verify.
    #[instrument(skip(self), fields(merchant_id = %self.config.merchant_id))]
    pub async fn query_trade_status(
        &self,
        merchant_trade_no: &str,
        at: DateTime<Utc>,
    ) -> Option<TradeStatusReport> {
        if merchant_trade_no.is_empty() {
            return None;
        }

        let timestamp = at.timestamp().to_string();
        let mut form: Vec<(&str, String)> = vec![
            ("MerchantID", self.config.merchant_id.clone()),
            ("MerchantTradeNo", merchant_trade_no.to_string()),
            ("TimeStamp", timestamp),
        ];
        let check_mac = self.compute_mac(form.iter().map(|(k, v)| (*k, v.as_str())));
        form.push((CHECK_MAC_FIELD, check_mac));

        let response = match self.http.post(self.endpoint(QUERY_PATH)).form(&form).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Trade status query failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "Trade status query rejected");
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Trade status body unreadable");
                return None;
            }
        };

        let fields: FormFields = url::form_urlencoded::parse(body.trim().as_bytes())
            .into_owned()
            .collect();
        if fields.is_empty() {
            warn!("Trade status body was empty or malformed");
            return None;
        }
        if fields.contains_key(CHECK_MAC_FIELD) && !self.verify_mac(&fields) {
            warn!("Trade status response failed MAC verification");
            return None;
        }

        let report = TradeStatusReport::from_fields(&fields);
        debug!(
            rtn_code = ?report.rtn_code,
            trade_status = ?report.trade_status,
            "Trade status received"
        );
        Some(report)
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn query_trade_status(
        &self,
        merchant_trade_no: &str,
        at: DateTime<Utc>,
    ) -> Option<TradeStatusReport> {
        GatewayClient::query_trade_status(self, merchant_trade_no, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::order::{Contact, LineItem, OrderState};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn client() -> GatewayClient {
        let config = GatewayConfig::sandbox("3002607", "pwFHCqoQZGmho4w6", "EkRm7iFT261dpevs").unwrap();
        GatewayClient::new(config).unwrap()
    }

    fn order() -> Order {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        Order {
            id: OrderId(42),
            order_number: "ORD2406010001".into(),
            user_id: None,
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
            transaction_id: Some(GatewayClient::generate_trade_no(OrderId(42), created)),
            state: OrderState::Pending,
            subtotal: Money::new(dec!(1000.40)),
            shipping_fee: Money::new(dec!(60)),
            total_amount: Money::new(dec!(1060.40)),
            items: vec![
                LineItem {
                    product_id: 1,
                    product_name: "Oolong tea".into(),
                    product_sku: Some("TEA-001".into()),
                    unit_price: Money::new(dec!(450.20)),
                    quantity: 2,
                    total_price: Money::new(dec!(900.40)),
                },
                LineItem {
                    product_id: 2,
                    product_name: "Tea cup".into(),
                    product_sku: None,
                    unit_price: Money::new(dec!(100)),
                    quantity: 1,
                    total_price: Money::new(dec!(100)),
                },
            ],
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_trade_no_format() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(GatewayClient::generate_trade_no(OrderId(42), at), "EC0000421717236000");
        assert!(GatewayClient::generate_trade_no(OrderId(42), at).len() <= 20);
    }

    #[test]
    fn test_trade_date_uses_gateway_offset() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 18, 30, 5).unwrap();
        assert_eq!(client().format_trade_date(at), "2024/06/02 02:30:05");
    }

    #[test]
    fn test_checkout_params_are_signed() {
        let client = client();
        let base = Url::parse("https://shop.example").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let params = client
            .build_checkout_params(&order(), &ReturnUrls::for_order(&base, OrderId(42)), at)
            .unwrap();

        assert_eq!(params.merchant_id, "3002607");
        assert_eq!(params.merchant_trade_no, "EC0000421717236000");
        assert_eq!(params.merchant_trade_date, "2024/06/01 18:00:00");
        assert_eq!(params.total_amount, 1060);
        assert_eq!(params.item_name, "Oolong tea x 2#Tea cup x 1");
        assert_eq!(params.return_url, "https://shop.example/payments/ecpay/notify");
        assert_eq!(params.order_result_url, "https://shop.example/payments/ecpay/result/42");
        assert_eq!(params.custom_fields[0], "42");
        assert_eq!(params.custom_fields[1], "Mei Lin");

        let fields: FormFields = params
            .fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert!(client.verify_mac(&fields));
    }

    #[test]
    fn test_checkout_requires_trade_no() {
        let mut order = order();
        order.transaction_id = None;
        let base = Url::parse("https://shop.example").unwrap();
        let result = client().build_checkout_params(&order, &ReturnUrls::for_order(&base, order.id), Utc::now());
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }

    #[test]
    fn test_verify_mac_fails_closed() {
        let client = client();
        let mut fields = FormFields::new();
        fields.insert("RtnCode".into(), "1".into());
        assert!(!client.verify_mac(&fields));

        fields.insert(CHECK_MAC_FIELD.into(), String::new());
        assert!(!client.verify_mac(&fields));

        let mac = client.compute_mac(fields.iter());
        fields.insert(CHECK_MAC_FIELD.into(), mac.to_lowercase());
        assert!(!client.verify_mac(&fields));

        fields.insert(CHECK_MAC_FIELD.into(), mac);
        assert!(client.verify_mac(&fields));
    }

    #[test]
    fn test_missing_credentials_rejected_at_construction() {
        let mut config = GatewayConfig::sandbox("3002607", "key", "iv").unwrap();
        config.hash_iv.clear();
        assert!(matches!(GatewayClient::new(config), Err(PaymentError::ConfigError(_))));
    }
}
