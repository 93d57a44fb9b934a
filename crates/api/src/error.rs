//! API error handling
//!
//! Domain errors map onto stable HTTP statuses and reason codes; raw
//! internal errors are logged but never leak into response bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use membergate_payments::PaymentError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error")]
    Internal(String),
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Validation(msg) => ApiError::BadRequest(msg),
            PaymentError::ClaimNotFound(id) => ApiError::NotFound(format!("payment {id}")),
            PaymentError::PlanNotFound(id) => ApiError::NotFound(format!("plan {id}")),
            PaymentError::DiscountNotFound(id) => ApiError::NotFound(format!("discount {id}")),
            PaymentError::AlreadyUsedFreePlan => {
                ApiError::Conflict("free plan already used".to_string())
            }
            PaymentError::AlreadyUsedDiscount => {
                ApiError::Conflict("discount already used".to_string())
            }
            PaymentError::AlreadyResolved(id) => {
                ApiError::Conflict(format!("payment {id} is already resolved"))
            }
            PaymentError::ConcurrentModification(msg) => ApiError::Conflict(msg),
            PaymentError::ChainUnavailable(msg) => ApiError::Unavailable(msg),
            PaymentError::Database(msg) | PaymentError::Config(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Config(msg) | ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal API error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
