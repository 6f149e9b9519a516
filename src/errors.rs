use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::telemetry::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint.
///
/// `error` is a stable machine-readable code; clients dispatch on it rather
/// than on the HTTP status, which may be shared between error kinds.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "OUT_OF_STOCK",
    "message": "Insufficient stock for variant 42: requested 3, available 1",
    "details": null,
    "request_id": "0b4ee26c-7a4f-4e55-bc67-1a09c2fbb6ac",
    "timestamp": "2025-08-25T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// Stable machine-readable error code (e.g. "OUT_OF_STOCK")
    #[schema(example = "OUT_OF_STOCK")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional detail when available (e.g. field-level validation output)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier for support and log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    OutOfStock {
        variant_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("Order cannot move from '{from}' to '{to}'")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Voucher '{0}' not found")]
    VoucherNotFound(String),

    #[error("Voucher inactive: {0}")]
    VoucherInactive(String),

    #[error("Voucher exhausted: {0}")]
    VoucherExhausted(String),

    #[error("Voucher usage limit reached for this user: {0}")]
    VoucherUserLimitReached(String),

    #[error("Order amount below voucher minimum: {0}")]
    VoucherMinAmountNotMet(String),

    #[error("Concurrent update conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfStock { .. } => "OUT_OF_STOCK",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::VoucherNotFound(_) => "VOUCHER_NOT_FOUND",
            Self::VoucherInactive(_) => "VOUCHER_INACTIVE",
            Self::VoucherExhausted(_) => "VOUCHER_EXHAUSTED",
            Self::VoucherUserLimitReached(_) => "VOUCHER_USER_LIMIT_REACHED",
            Self::VoucherMinAmountNotMet(_) => "VOUCHER_MIN_AMOUNT_NOT_MET",
            Self::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            Self::OperationTimeout(_) => "OPERATION_TIMEOUT",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidOperation(_) => "INVALID_OPERATION",
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::OutOfStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidStatusTransition { .. } => StatusCode::CONFLICT,
            Self::VoucherNotFound(_) => StatusCode::NOT_FOUND,
            Self::VoucherInactive(_)
            | Self::VoucherExhausted(_)
            | Self::VoucherUserLimitReached(_)
            | Self::VoucherMinAmountNotMet(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            Self::OperationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::EventError(_)
            | Self::InternalError(_)
            | Self::DatabaseError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: self.code().to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};

    fn out_of_stock() -> ServiceError {
        ServiceError::OutOfStock {
            variant_id: 42,
            requested: 3,
            available: 1,
        }
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(out_of_stock().status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            ServiceError::InvalidStatusTransition {
                from: "shipped".into(),
                to: "cancelled".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::VoucherNotFound("SAVE10".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::VoucherMinAmountNotMet("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::ConcurrencyConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::OperationTimeout("x".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::db_error("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn machine_codes_are_stable() {
        assert_eq!(out_of_stock().code(), "OUT_OF_STOCK");
        assert_eq!(
            ServiceError::VoucherExhausted("x".into()).code(),
            "VOUCHER_EXHAUSTED"
        );
        assert_eq!(
            ServiceError::VoucherUserLimitReached("x".into()).code(),
            "VOUCHER_USER_LIMIT_REACHED"
        );
        assert_eq!(
            ServiceError::ConcurrencyConflict("x".into()).code(),
            "CONCURRENCY_CONFLICT"
        );
        // Same HTTP status, different codes: clients must be able to tell
        // stock exhaustion apart from a voucher minimum failure.
        let a = out_of_stock();
        let b = ServiceError::VoucherMinAmountNotMet("min 100000".into());
        assert_eq!(a.status_code(), b.status_code());
        assert_ne!(a.code(), b.code());
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::db_error("connection refused on 10.0.0.3").response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InternalError("stack trace".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            out_of_stock().response_message(),
            "Insufficient stock for variant 42: requested 3, available 1"
        );
    }

    #[tokio::test]
    async fn error_response_carries_code_and_request_id() {
        let response = crate::telemetry::scope_request_id(
            crate::telemetry::RequestId::new("req-123"),
            async { out_of_stock().into_response() },
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.error, "OUT_OF_STOCK");
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn validation_errors_convert() {
        use validator::Validate;

        #[derive(Validate)]
        struct Probe {
            #[validate(range(min = 1))]
            quantity: i32,
        }

        let err: ServiceError = Probe { quantity: 0 }.validate().unwrap_err().into();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
