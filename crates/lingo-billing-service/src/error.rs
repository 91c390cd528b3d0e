//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use lingo_billing_core::PromoCodeRejection;
use lingo_billing_store::StoreError;

use crate::promo::PromoError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A promo code cannot be redeemed.
    #[error("promo code rejected: {0}")]
    PromoCodeRejected(PromoCodeRejection),

    /// A required integration is not configured.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
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
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::PromoCodeRejected(reason) => {
                let status = if matches!(reason, PromoCodeRejection::NotFound) {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::CONFLICT
                };
                (status, reason.code(), reason.user_message(), None)
            }
            Self::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
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

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("record not found".into()),
            StoreError::AlreadyExists { key } => Self::Conflict(format!("{key} already exists")),
            StoreError::AlreadyRedeemed { .. } => {
                Self::PromoCodeRejected(PromoCodeRejection::AlreadyUsed)
            }
            StoreError::UsageLimitReached { .. } => {
                Self::PromoCodeRejected(PromoCodeRejection::LimitReached)
            }
            StoreError::InvalidPromoCode(e) => Self::BadRequest(e.to_string()),
            StoreError::DuplicateEvent { event_id } => {
                Self::Conflict(format!("event {event_id} already processed"))
            }
            err @ StoreError::VersionConflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<PromoError> for ApiError {
    fn from(err: PromoError) -> Self {
        match err {
            PromoError::Rejected(reason) => Self::PromoCodeRejected(reason),
            PromoError::Invalid(e) => Self::BadRequest(e.to_string()),
            PromoError::NotFound(code) => Self::NotFound(format!("promo code not found: {code}")),
            PromoError::Store(e) => e.into(),
        }
    }
}

/// Errors raised while authenticating and parsing provider webhooks.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The signature header is absent.
    #[error("missing signature header")]
    MissingSignature,

    /// The signature header cannot be parsed.
    #[error("malformed signature header")]
    MalformedSignature,

    /// The signature does not match the payload.
    #[error("signature mismatch")]
    InvalidSignature,

    /// The signed timestamp is outside the tolerance window.
    #[error("signature timestamp outside tolerance ({age_seconds}s)")]
    TimestampOutOfTolerance {
        /// Distance between the signed timestamp and now.
        age_seconds: i64,
    },

    /// The body is not a valid webhook envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope is valid but its data cannot be interpreted.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

impl WebhookError {
    /// Whether the request should be refused (provider will retry) rather
    /// than acknowledged.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::InvalidPayload(_))
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
