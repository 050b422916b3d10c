use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rova_core::{PaymentMethod, PaymentSession, PaymentStatus};
use rova_payment::{CheckoutRedirect, SettlementError};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OpenPaymentRequest {
    pub reservation_id: Uuid,
    pub method: PaymentMethod,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments", post(open_payment))
        .route("/v1/payments/callback", get(payment_callback))
        .route("/v1/payments/{order_id}", get(get_payment))
}

/// POST /v1/payments
/// Open a checkout session for a pending reservation. The charge amount
/// comes from the stored reservation, never from this request.
async fn open_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OpenPaymentRequest>,
) -> Result<Json<CheckoutRedirect>, AppError> {
    let ip = client_ip(&headers);
    let redirect = state
        .payments
        .open(req.reservation_id, req.method, &ip)
        .await?;
    Ok(Json(redirect))
}

/// GET /v1/payments/{order_id}
/// Session status for storefront polling
async fn get_payment(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentSession>, AppError> {
    let session = state.payments.get_status(&order_id).await?;
    Ok(Json(session))
}

/// GET /v1/payments/callback
/// Gateway return leg. The customer's browser arrives here carrying the
/// signed outcome parameters; after reconciliation it is forwarded to the
/// client status page with a reason code.
async fn payment_callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    // Kept aside so rejected callbacks can still name the order they
    // claimed to describe
    let claimed_order = params.get("pay_txn_ref").cloned();
    let params: BTreeMap<String, String> = params.into_iter().collect();

    match state.reconciler.reconcile(params).await {
        Ok(result) => {
            let reason = match result.status {
                PaymentStatus::Completed => "paid",
                PaymentStatus::Failed => "declined",
                PaymentStatus::Pending => "declined",
            };
            Ok(client_redirect(
                &state.client_result_url,
                Some(&result.order_id),
                reason,
            ))
        }
        Err(SettlementError::InvalidSignature(e)) => {
            tracing::error!(error = %e, "Rejected gateway callback signature");
            Ok(client_redirect(
                &state.client_result_url,
                claimed_order.as_deref(),
                "invalid-signature",
            ))
        }
        Err(SettlementError::SessionNotFound(order_id)) => {
            tracing::warn!(order_id = %order_id, "Callback for unknown order");
            Ok(client_redirect(
                &state.client_result_url,
                Some(&order_id),
                "unknown-order",
            ))
        }
        Err(SettlementError::MissingField(field)) => {
            tracing::warn!(field, "Callback missing required field");
            Ok(client_redirect(
                &state.client_result_url,
                claimed_order.as_deref(),
                "unknown-order",
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// 302 to the client status page with the order reference and outcome
fn client_redirect(base: &str, order_id: Option<&str>, reason: &str) -> Response {
    let location = match order_id {
        Some(order_id) => format!("{base}?order_id={order_id}&result={reason}"),
        None => format!("{base}?result={reason}"),
    };
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}
