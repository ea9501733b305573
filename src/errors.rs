use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Wire shape for every error leaving the API. Internal detail (database
/// messages, stack context) never crosses this boundary.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable machine-readable kind, e.g. "invalid_transition".
    pub error: String,
    /// Human-readable description.
    pub message: String,
    /// ISO 8601 timestamp when the error occurred.
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Return window expired: {0}")]
    ReturnWindowExpired(String),

    #[error("A pending return already exists for warranty unit {0}")]
    DuplicatePendingReturn(uuid::Uuid),

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    #[error("Coupon {0} is inactive")]
    CouponInactive(String),

    #[error("Coupon {0} is outside its validity window")]
    CouponOutOfWindow(String),

    #[error("Coupon {0} has reached its usage limit")]
    CouponExhausted(String),

    #[error("Coupon {code} requires a minimum order value of {minimum}")]
    OrderBelowMinimum {
        code: String,
        minimum: rust_decimal::Decimal,
    },

    #[error("Coupon {0} was already used by this customer")]
    CouponAlreadyUsed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidTransition(_)
            | ServiceError::DuplicatePendingReturn(_)
            | ServiceError::CouponInactive(_)
            | ServiceError::CouponOutOfWindow(_)
            | ServiceError::CouponExhausted(_)
            | ServiceError::CouponAlreadyUsed(_) => StatusCode::CONFLICT,
            ServiceError::ReturnWindowExpired(_) | ServiceError::OrderBelowMinimum { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::NotFound(_) | ServiceError::CouponNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidTransition(_) => "invalid_transition",
            ServiceError::ReturnWindowExpired(_) => "return_window_expired",
            ServiceError::DuplicatePendingReturn(_) => "duplicate_pending_return",
            ServiceError::CouponNotFound(_) => "coupon_not_found",
            ServiceError::CouponInactive(_) => "coupon_inactive",
            ServiceError::CouponOutOfWindow(_) => "coupon_out_of_window",
            ServiceError::CouponExhausted(_) => "coupon_exhausted",
            ServiceError::OrderBelowMinimum { .. } => "order_below_minimum",
            ServiceError::CouponAlreadyUsed(_) => "coupon_already_used",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::ValidationError(_) => "validation_failed",
            ServiceError::DatabaseError(_) => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Database detail stays in the logs.
            ServiceError::DatabaseError(e) => {
                tracing::error!(error = %e, "request failed with database error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message,
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
