//! API error types and responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use meterline_core::{BillingError, CouponRejection};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the request contradicts stored state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The coupon does not apply to the requested purchase.
    #[error("{0}")]
    CouponRejected(CouponRejection),

    /// Storage is busy; the client may retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::CouponRejected(rejection) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "coupon_rejected",
                rejection.to_string(),
                Some(serde_json::json!({ "reason": rejection.reason() })),
            ),
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "The service is busy, try again".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            BillingError::Conflict(msg) => Self::Conflict(msg),
            BillingError::InvalidAmount(msg) | BillingError::InvalidUsage(msg) => {
                Self::BadRequest(msg)
            }
            BillingError::InvalidId(e) => Self::BadRequest(e.to_string()),
            BillingError::Storage {
                message,
                retryable: true,
            } => Self::Unavailable(message),
            BillingError::Storage { message, .. } => Self::Internal(message),
            err @ (BillingError::DataIntegrity(_)
            | BillingError::Configuration(_)
            | BillingError::Notification(_)) => Self::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<meterline_store::StoreError> for ApiError {
    fn from(err: meterline_store::StoreError) -> Self {
        BillingError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_errors_map_to_statuses() {
        let cases = [
            (BillingError::not_found("wallet", "u1"), StatusCode::NOT_FOUND),
            (BillingError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                BillingError::InvalidUsage("empty".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::Storage {
                    message: "lock timeout".into(),
                    retryable: true,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BillingError::DataIntegrity("missing plan".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn coupon_rejection_is_unprocessable() {
        let response = ApiError::CouponRejected(CouponRejection::Expired).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
