//! The stable error-code taxonomy and its HTTP/JSON and in-stream renderings.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

/// Every error the facade can surface to a caller, each mapped to exactly
/// one stable wire code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid API key")]
    InvalidApiKey,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("session is locked")]
    SessionLocked,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("webhook error: {0}")]
    Webhook(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("rate limited")]
    RateLimited,

    #[error("forbidden URL: {0}")]
    ForbiddenUrl(String),

    #[error("forbidden command: {0}")]
    ForbiddenCommand(String),

    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    /// The stable wire code from §6's taxonomy.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionLocked => "SESSION_LOCKED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Webhook(_) => "WEBHOOK_ERROR",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::RateLimited => "RATE_LIMITED",
            Self::ForbiddenUrl(_) => "FORBIDDEN_URL",
            Self::ForbiddenCommand(_) => "FORBIDDEN_COMMAND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound | Self::SessionExpired => StatusCode::NOT_FOUND,
            Self::SessionLocked => StatusCode::CONFLICT,
            Self::Validation(_) | Self::ForbiddenUrl(_) | Self::ForbiddenCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Webhook(_) | Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a caller: never a wrapped exception's
    /// `Display`, no stack traces, no webhook URLs or credentials.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_string(),
            Self::UpstreamUnavailable(_) => "the agent runtime is unavailable".to_string(),
            Self::Webhook(_) => "a lifecycle hook failed".to_string(),
            other => other.to_string(),
        }
    }

    /// Render as the canonical in-stream SSE/WS `error` event payload.
    #[must_use]
    pub fn to_event_payload(&self, debug: bool) -> Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.public_message(),
            "details": self.details(debug),
        })
    }

    fn details(&self, debug: bool) -> Option<Value> {
        if !debug {
            return None;
        }
        match self {
            Self::Internal(source) => Some(Value::String(source.to_string())),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Whether `details` should ever be populated for HTTP error bodies. Set
/// once at startup from `AppConfig::debug`; absent entirely outside debug.
pub static DEBUG_DETAILS: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let debug = DEBUG_DETAILS.load(std::sync::atomic::Ordering::Relaxed);
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
                details: self.details(debug),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<crate::repository::RepoError> for ApiError {
    fn from(err: crate::repository::RepoError) -> Self {
        match err {
            crate::repository::RepoError::SessionNotFound(_) => Self::SessionNotFound,
            other => Self::Internal(Box::new(other)),
        }
    }
}

impl From<crate::cache::CacheError> for ApiError {
    fn from(err: crate::cache::CacheError) -> Self {
        Self::Internal(Box::new(err))
    }
}
