//! Error types for the Graph gateway
//!
//! The taxonomy is closed: every failure a caller can observe maps to one of
//! the variants below, and every variant carries a stable wire code plus the
//! HTTP status the outer transport should emit.

use serde_json::{Value, json};
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Caller bearer missing/invalid, or the session is unknown/expired
    #[error("{0}")]
    AuthRequired(String),

    /// Malformed input from the caller
    #[error("{message}")]
    Validation {
        /// Human-readable description
        message: String,
        /// 400 for malformed input, 413 for oversized payloads
        status: u16,
    },

    /// Upstream (authorization server or resource API) failure
    #[error("{0}")]
    Upstream(String),

    /// Domain object not found
    #[error("{0}")]
    NotFound(String),

    /// Conflicting state for the requested operation
    #[error("{0}")]
    Conflict(String),

    /// Startup configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Missing/invalid caller credentials or session (401).
    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::AuthRequired(message.into())
    }

    /// Malformed caller input (400).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status: 400,
        }
    }

    /// Caller payload exceeded a configured bound (413).
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status: 413,
        }
    }

    /// Upstream failure surfaced to the caller (502).
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Stable wire code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired(_) => "AUTH_REQUIRED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Config(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the outer transport should emit.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::AuthRequired(_) => 401,
            Self::Validation { status, .. } => *status,
            Self::Upstream(_) => 502,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }

    /// Caller-visible error payload: `{"error": {"code", "message", "correlation_id"?}}`.
    #[must_use]
    pub fn error_body(&self, correlation_id: Option<&str>) -> Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(id) = correlation_id {
            error["correlation_id"] = json!(id);
        }
        json!({ "error": error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_are_stable() {
        assert_eq!(Error::auth_required("x").code(), "AUTH_REQUIRED");
        assert_eq!(Error::auth_required("x").status(), 401);
        assert_eq!(Error::validation("x").status(), 400);
        assert_eq!(Error::payload_too_large("x").status(), 413);
        assert_eq!(Error::upstream("x").code(), "UPSTREAM_ERROR");
        assert_eq!(Error::upstream("x").status(), 502);
        assert_eq!(Error::NotFound("x".into()).status(), 404);
        assert_eq!(Error::Conflict("x".into()).status(), 409);
    }

    #[test]
    fn error_body_includes_correlation_id_when_present() {
        let err = Error::upstream("token exchange failed");
        let body = err.error_body(Some("corr-1"));
        assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
        assert_eq!(body["error"]["message"], "token exchange failed");
        assert_eq!(body["error"]["correlation_id"], "corr-1");
    }

    #[test]
    fn error_body_omits_correlation_id_when_absent() {
        let body = Error::auth_required("missing session").error_body(None);
        assert!(body["error"].get("correlation_id").is_none());
    }
}
