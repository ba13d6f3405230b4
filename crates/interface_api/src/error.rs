//! API error handling

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use domain_billing::BillingError;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, "credit_limit_exceeded", msg.clone()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "persistence_failure", msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone()),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = error_type, %message, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let message = err.to_string();
        match err {
            BillingError::Validation(_) | BillingError::Money(_) | BillingError::Temporal(_) => {
                ApiError::Validation(message)
            }
            BillingError::NotFound { .. } => ApiError::NotFound(message),
            BillingError::ResourceInactive { .. }
            | BillingError::PeriodClosed { .. }
            | BillingError::DuplicatePeriod { .. }
            | BillingError::InvalidStateTransition(_)
            | BillingError::Conflict(_) => ApiError::Conflict(message),
            BillingError::CreditLimitExceeded { .. } => {
                warn!(%message, "Provisioning refused");
                ApiError::PaymentRequired(message)
            }
            BillingError::Persistence(_) => ApiError::Unavailable(message),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::Validation(e.body_text()),
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::{Currency, Money, PortError};
    use rust_decimal_macros::dec;

    fn status(err: BillingError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_domain_errors_map_to_status_codes() {
        assert_eq!(status(BillingError::validation("bad")), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(BillingError::not_found("Invoice", "x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status(BillingError::CreditLimitExceeded {
                current_balance: Money::new(dec!(480), Currency::USD),
                requested: Money::new(dec!(30), Currency::USD),
                credit_limit: Money::new(dec!(500), Currency::USD),
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status(BillingError::Persistence(PortError::connection("down"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status(BillingError::Conflict("moved".into())), StatusCode::CONFLICT);
    }
}
