//! Trade-status queries against a mock gateway.

mod common;

use chrono::{DateTime, Utc};
use common::{HASH_IV, HASH_KEY, MERCHANT_ID, at, gateway_config};
use std::time::Duration;
use storepay::gateway::GatewayClient;
use storepay::gateway::mac::compute_mac;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> GatewayClient {
    let mut config = gateway_config();
    config.base_url = server.uri().parse().unwrap();
    config.timeout = Duration::from_secs(1);
    GatewayClient::new(config).unwrap()
}

/// 2024-06-01T10:00:00Z, epoch 1717236000.
fn queried_at() -> DateTime<Utc> {
    at(2024, 6, 1, 10, 0, 0)
}

fn signed_body(pairs: &[(&str, &str)]) -> String {
    let mac = compute_mac(pairs.iter().copied(), HASH_KEY, HASH_IV);
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().copied())
        .append_pair("CheckMacValue", &mac)
        .finish()
}

#[tokio::test]
async fn query_posts_signed_request_and_parses_paid_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Cashier/QueryTradeInfo/V5"))
        .and(body_string_contains(format!("MerchantID={MERCHANT_ID}")))
        .and(body_string_contains("MerchantTradeNo=EC0000421717236000"))
        .and(body_string_contains("TimeStamp=1717236000"))
        .and(body_string_contains("CheckMacValue="))
        .respond_with(ResponseTemplate::new(200).set_body_string(signed_body(&[
            ("MerchantID", MERCHANT_ID),
            ("MerchantTradeNo", "EC0000421717236000"),
            ("TradeNo", "2406011000001"),
            ("TradeAmt", "1060"),
            ("TradeStatus", "1"),
            ("PaymentType", "Credit_CreditCard"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let report = client_for(&server)
        .query_trade_status("EC0000421717236000", queried_at())
        .await
        .expect("report");

    assert!(report.is_success());
    assert_eq!(report.trade_no.as_deref(), Some("2406011000001"));
    assert_eq!(report.merchant_trade_no.as_deref(), Some("EC0000421717236000"));
}

#[tokio::test]
async fn unsigned_report_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Cashier/QueryTradeInfo/V5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("MerchantTradeNo=EC0000421717236000&TradeStatus=0&RtnMsg=Unpaid"),
        )
        .mount(&server)
        .await;

    let report = client_for(&server)
        .query_trade_status("EC0000421717236000", queried_at())
        .await
        .expect("report");

    assert!(!report.is_success());
    assert_eq!(report.message(), Some("Unpaid"));
}

#[tokio::test]
async fn report_with_bad_mac_is_treated_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Cashier/QueryTradeInfo/V5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "MerchantTradeNo=EC0000421717236000&TradeNo=2406011000001&TradeStatus=1&CheckMacValue=DEADBEEF",
        ))
        .mount(&server)
        .await;

    assert!(
        client_for(&server)
            .query_trade_status("EC0000421717236000", queried_at())
            .await
            .is_none()
    );
}

#[tokio::test]
async fn server_error_is_treated_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(
        client_for(&server)
            .query_trade_status("EC0000421717236000", queried_at())
            .await
            .is_none()
    );
}

#[tokio::test]
async fn empty_body_is_treated_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    assert!(
        client_for(&server)
            .query_trade_status("EC0000421717236000", queried_at())
            .await
            .is_none()
    );
}

#[tokio::test]
async fn slow_gateway_times_out_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("TradeStatus=1&TradeNo=2406011000001")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    assert!(
        client_for(&server)
            .query_trade_status("EC0000421717236000", queried_at())
            .await
            .is_none()
    );
}

#[tokio::test]
async fn unreachable_gateway_is_treated_as_unknown() {
    let mut config = gateway_config();
    config.base_url = "http://127.0.0.1:9".parse().unwrap();
    config.timeout = Duration::from_secs(1);
    let client = GatewayClient::new(config).unwrap();

    assert!(client.query_trade_status("EC0000421717236000", queried_at()).await.is_none());
}
