//! HTTP surface: checkout, the gateway's callback endpoints, and the operator tools.

use crate::application::callback::{CallbackChannel, CallbackHandler};
use crate::application::checkout::{CheckoutInitiator, CheckoutRequest};
use crate::application::sweeper::{DEFAULT_SWEEP_LIMIT, ReconciliationSweeper, SweepReport};
use crate::domain::cart::CartId;
use crate::domain::order::{Contact, Order, OrderId};
use crate::domain::ports::OrderStoreRef;
use crate::error::PaymentError;
use crate::gateway::FormFields;
use axum::body::Bytes;
use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderStoreRef,
    pub checkout: Arc<CheckoutInitiator>,
    pub callbacks: Arc<CallbackHandler>,
    pub sweeper: Arc<ReconciliationSweeper>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/checkout", post(checkout))
        .route("/payments/ecpay/notify", post(notify))
        .route("/payments/ecpay/result/{order_id}", post(payment_result))
        .route("/admin/orders/pending", get(pending_orders))
        .route("/admin/orders/sync", post(sync_orders))
        .with_state(state)
}

/// JSON error body for the operator endpoints. Internal details stay in the logs.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

pub struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            PaymentError::ValidationError(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", msg.clone())
            }
            PaymentError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            PaymentError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            other => {
                error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { code, message })).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Checkout form as posted by the storefront. Every field is optional here so
/// that gaps surface as validation errors rather than extractor rejections.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CheckoutForm {
    cart_id: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    address: String,
    notes: String,
    shipping_method_id: String,
}

impl CheckoutForm {
    fn into_request(self) -> Result<CheckoutRequest, PaymentError> {
        let cart_id: u64 = self
            .cart_id
            .trim()
            .parse()
            .map_err(|_| PaymentError::validation(format!("invalid cart '{}'", self.cart_id)))?;
        Ok(CheckoutRequest {
            cart_id: CartId(cart_id),
            contact: Contact {
                first_name: self.first_name,
                last_name: self.last_name,
                email: self.email,
                phone: self.phone,
                address: self.address,
                notes: self.notes,
            },
            shipping_method_id: self.shipping_method_id,
        })
    }
}

/// What the browser needs to auto-post the customer to the gateway.
#[derive(Debug, Serialize)]
struct CheckoutResponse {
    order_id: OrderId,
    order_number: String,
    action_url: String,
    fields: FormFields,
}

async fn checkout(
    State(state): State<AppState>,
    Form(form): Form<CheckoutForm>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let submission = state.checkout.initiate(form.into_request()?).await?;
    let fields = submission
        .params
        .fields()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id: submission.order_id,
            order_number: submission.order_number,
            action_url: submission.action_url,
            fields,
        }),
    ))
}

/// Parses the gateway's form body whatever `Content-Type` it arrived with, so
/// every reply stays in the protocol's token format.
fn parse_form(body: &[u8]) -> FormFields {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// Server-to-server notification. The body is the bare protocol token.
async fn notify(State(state): State<AppState>, body: Bytes) -> Response {
    let form = parse_form(&body);
    match state
        .callbacks
        .handle_notification(&form, CallbackChannel::ServerNotify)
        .await
    {
        Ok(outcome) => outcome.token().into_response(),
        Err(e) => {
            error!(error = %e, "Payment notification could not be applied");
            // The gateway retries on anything but `1|OK`.
            (StatusCode::INTERNAL_SERVER_ERROR, "0|InternalError").into_response()
        }
    }
}

/// Browser redirect after payment. Applies the same result, then sends the
/// customer to their order page whatever the outcome.
async fn payment_result(
    State(state): State<AppState>,
    Path(order_id): Path<u64>,
    body: Bytes,
) -> Redirect {
    let form = parse_form(&body);
    match state
        .callbacks
        .handle_notification(&form, CallbackChannel::BrowserRedirect)
        .await
    {
        Ok(outcome) => {
            if let Some(order) = outcome.order()
                && order.id.0 != order_id
            {
                warn!(path_order_id = order_id, resolved_order_id = %order.id, "Result posted for a different order");
            }
        }
        Err(e) => error!(error = %e, order_id, "Payment result could not be applied"),
    }
    Redirect::to(&format!("/orders/{order_id}"))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

/// Pending orders, oldest first: exactly what the next sync would examine.
async fn pending_orders(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_SWEEP_LIMIT);
    Ok(Json(state.orders.pending_oldest_first(limit).await?))
}

async fn sync_orders(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<SweepReport>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_SWEEP_LIMIT);
    let report = state.sweeper.sweep(limit).await?;
    Ok(Json(report))
}
