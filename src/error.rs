//! Error types and HTTP response conversion
//!
//! Internal boundaries return `Result<T, Error>`; the single translation to
//! an RFC 9457 problem-details body happens here in [`IntoResponse`].

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the service error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the service
///
/// Large foreign error variants are boxed to reduce stack size.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (startup-fatal)
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Malformed request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Semantically invalid input (422)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Agent type outside the configured allowlist (422)
    #[error("Agent type not allowed: {0}")]
    TypeNotAllowed(String),

    /// Authentication failure (401) with a machine-readable code
    #[error("Authentication failed: {detail}")]
    Unauthorized {
        /// Stable code such as `token_expired` or `fingerprint_mismatch`
        code: &'static str,
        detail: String,
    },

    /// Authorization failure (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource conflict (409) with a machine-readable code
    #[error("Conflict: {detail}")]
    Conflict {
        /// Stable code such as `duplicate_agent_id` or `token_already_used`
        code: &'static str,
        detail: String,
    },

    /// Rate limit exceeded (429); callers must wait `retry_after_secs`
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Storage backend failure that could not be compensated (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedder provider failure; callers treat the port as best-effort
    #[error("Embedder error: {0}")]
    Embedder(String),

    /// Upstream agent or provider failure (502)
    #[error("External service error: {0}")]
    External(String),

    /// Redis driver error
    #[error("Redis error: {0}")]
    Redis(Box<redis::RedisError>),

    /// JWT encode/decode error
    #[error("JWT error: {0}")]
    Jwt(Box<jsonwebtoken::errors::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// Authentication failure with a stable code
    pub fn unauthorized(code: &'static str, detail: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            detail: detail.into(),
        }
    }

    /// Conflict with a stable code
    pub fn conflict(code: &'static str, detail: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            detail: detail.into(),
        }
    }

    /// The stable machine-readable code for this error
    pub fn code(&self) -> &str {
        match self {
            Self::Config(_) => "config_error",
            Self::BadRequest(_) => "bad_request",
            Self::Validation(_) => "validation_failed",
            Self::TypeNotAllowed(_) => "type_not_allowed",
            Self::Unauthorized { code, .. } => code,
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict { code, .. } => code,
            Self::RateLimited { .. } => "rate_limited",
            Self::Storage(_) => "storage_error",
            Self::Embedder(_) => "embedder_error",
            Self::External(_) => "external_error",
            Self::Redis(_) => "storage_error",
            Self::Jwt(_) => "token_invalid",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) | Self::TypeNotAllowed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized { .. } | Self::Jwt(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// RFC 9457 problem-details response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// Error type URI (`urn:arcp:error:<code>`)
    #[serde(rename = "type")]
    pub kind: String,

    /// Short human-readable summary
    pub title: String,

    /// HTTP status code
    pub status: u16,

    /// Human-readable explanation specific to this occurrence
    pub detail: String,

    /// Request path that produced the error, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// Server time of the error
    pub timestamp: DateTime<Utc>,

    /// Seconds the caller must wait before retrying (429 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ProblemDetails {
    /// Build a problem-details body for a status/code/detail triple
    pub fn new(status: StatusCode, code: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: format!("urn:arcp:error:{code}"),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            timestamp: Utc::now(),
            retry_after: None,
        }
    }
}

impl fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.detail, self.kind)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code().to_string();

        // Server-side failures are logged with full detail; the body carries
        // a sanitized message.
        let detail = match &self {
            Error::Redis(e) => {
                tracing::error!(error = %e, "Redis error");
                "Storage backend unavailable".to_string()
            }
            Error::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                "Storage operation failed".to_string()
            }
            Error::Io(e) => {
                tracing::error!(error = %e, "I/O error");
                "I/O operation failed".to_string()
            }
            Error::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "Internal server error".to_string()
            }
            Error::Config(e) => {
                tracing::error!(error = %e, "Configuration error");
                "Service misconfigured".to_string()
            }
            Error::External(msg) => {
                tracing::warn!(error = %msg, "External service error");
                "Upstream service unavailable".to_string()
            }
            other => other.to_string(),
        };

        let mut body = ProblemDetails::new(status, &code, detail);

        if let Error::RateLimited { retry_after_secs } = &self {
            body.retry_after = Some(*retry_after_secs);
            let mut response = (status, Json(body)).into_response();
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }

        (status, Json(body)).into_response()
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Redis(Box::new(err))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Jwt(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::conflict("duplicate_agent_id", "x").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::RateLimited {
                retry_after_secs: 30
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            Error::unauthorized("token_expired", "expired").code(),
            "token_expired"
        );
        assert_eq!(Error::Validation("x".into()).code(), "validation_failed");
    }

    #[test]
    fn test_problem_details_shape() {
        let body = ProblemDetails::new(StatusCode::CONFLICT, "duplicate_agent_id", "taken");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "urn:arcp:error:duplicate_agent_id");
        assert_eq!(json["status"], 409);
        assert_eq!(json["detail"], "taken");
        assert!(json.get("retry_after").is_none());
    }

    #[test]
    fn test_retry_after_serialized() {
        let mut body =
            ProblemDetails::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "slow down");
        body.retry_after = Some(17);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["retry_after"], 17);
    }
}
