use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rova_booking::BookingError;
use rova_core::StoreError;
use rova_payment::{PaymentError, SettlementError};
use serde_json::json;

/// Maps domain errors onto HTTP responses. Availability conflicts and
/// signature rejections keep their own codes so clients can react to
/// them; backend failures collapse into an opaque 500.
#[derive(Debug)]
pub enum AppError {
    Booking(BookingError),
    Payment(PaymentError),
    Settlement(SettlementError),
    Anyhow(anyhow::Error),
}

impl From<BookingError> for AppError {
    fn from(e: BookingError) -> Self {
        Self::Booking(e)
    }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        Self::Payment(e)
    }
}

impl From<SettlementError> for AppError {
    fn from(e: SettlementError) -> Self {
        Self::Settlement(e)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self::Anyhow(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Booking(e) => match e {
                BookingError::InvalidWindow => {
                    (StatusCode::BAD_REQUEST, "INVALID_WINDOW", e.to_string())
                }
                BookingError::CarNotFound(_) => {
                    (StatusCode::NOT_FOUND, "CAR_NOT_FOUND", e.to_string())
                }
                BookingError::ReservationNotFound(_) => {
                    (StatusCode::NOT_FOUND, "RESERVATION_NOT_FOUND", e.to_string())
                }
                BookingError::CarUnavailable => {
                    (StatusCode::CONFLICT, "CAR_UNAVAILABLE", e.to_string())
                }
                BookingError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION", e.to_string())
                }
                BookingError::Store(e) => internal(e),
            },
            AppError::Payment(e) => match e {
                PaymentError::ReservationNotFound(_) => {
                    (StatusCode::NOT_FOUND, "RESERVATION_NOT_FOUND", e.to_string())
                }
                PaymentError::NotPayable { .. } => {
                    (StatusCode::CONFLICT, "NOT_PAYABLE", e.to_string())
                }
                PaymentError::SessionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", e.to_string())
                }
                PaymentError::GatewayUrl(e) => internal(e),
                PaymentError::Store(e) => internal(e),
            },
            AppError::Settlement(e) => match e {
                SettlementError::InvalidSignature(_) => {
                    tracing::error!(error = %e, "Rejected gateway callback signature");
                    (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", e.to_string())
                }
                SettlementError::SessionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", e.to_string())
                }
                SettlementError::MissingField(_) => {
                    (StatusCode::BAD_REQUEST, "MISSING_FIELD", e.to_string())
                }
                SettlementError::Store(e) => internal(e),
            },
            AppError::Anyhow(e) => {
                tracing::error!("Internal Server Error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

fn internal(e: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!("Internal Server Error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL",
        "Internal Server Error".to_string(),
    )
}

/// Store failures surfacing outside a domain flow (direct reads)
impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Anyhow(anyhow::Error::new(e))
    }
}
