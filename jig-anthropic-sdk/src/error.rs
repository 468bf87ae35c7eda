//! Error types for the Anthropic wire client

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// API Error Types
// ============================================================================

/// API error response wrapper (`{"type":"error","error":{...}}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub error: ApiError,
}

/// API error details
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

// ============================================================================
// Client Error Types
// ============================================================================

/// Errors that can occur when talking to an Anthropic-family endpoint
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// Authentication failed (invalid or expired credentials)
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Rate limited by the API (429), with the `Retry-After` hint if present
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Service overloaded or unavailable (529, 503, `overloaded_error`)
    #[error("service overloaded: {0}")]
    Overloaded(String),

    /// Invalid request (400 family)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to parse an API response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Network error (connect, timeout, transport)
    #[error("network error: {0}")]
    Network(String),

    /// JSON serialization/deserialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Streaming error
    #[error("stream error: {0}")]
    Stream(String),

    /// Configuration error (missing credentials, bad endpoint)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AnthropicError {
    /// Classify an error body + status into an error variant.
    ///
    /// The body may be a structured `ApiErrorResponse` or opaque text; both
    /// are handled. The raw body text is preserved in the message so callers
    /// can pattern-match provider-specific phrases (context-limit overruns,
    /// "overloaded", unpaired `tool_use` complaints).
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let (error_type, message) = match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(resp) => (resp.error.error_type, resp.error.message),
            Err(_) => (String::new(), body.to_string()),
        };

        match (status, error_type.as_str()) {
            (401, _) | (403, _) | (_, "authentication_error") | (_, "permission_error") => {
                AnthropicError::Authentication(message)
            }
            (429, _) | (_, "rate_limit_error") => AnthropicError::RateLimited {
                message,
                retry_after,
            },
            (529, _) | (503, _) | (_, "overloaded_error") => AnthropicError::Overloaded(message),
            (400..=499, _) => AnthropicError::InvalidRequest(message),
            (500..=599, _) => AnthropicError::Overloaded(message),
            _ => AnthropicError::Other(message),
        }
    }

    /// Classify a transport-level reqwest error
    pub fn from_reqwest_error(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AnthropicError::Network(format!("request timed out: {}", err))
        } else if err.is_connect() {
            AnthropicError::Network(format!("connection failed: {}", err))
        } else {
            AnthropicError::Network(err.to_string())
        }
    }

    /// Returns true for errors worth retrying at a higher layer
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnthropicError::RateLimited { .. }
                | AnthropicError::Overloaded(_)
                | AnthropicError::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_structured_body() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#;
        let err = AnthropicError::from_status(429, body, Some(Duration::from_secs(2)));
        match err {
            AnthropicError::RateLimited {
                message,
                retry_after,
            } => {
                assert_eq!(message, "slow down");
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_from_status_opaque_body() {
        let err = AnthropicError::from_status(400, "something went wrong", None);
        match err {
            AnthropicError::InvalidRequest(msg) => assert_eq!(msg, "something went wrong"),
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_from_status_auth() {
        let err = AnthropicError::from_status(401, "no key", None);
        assert!(matches!(err, AnthropicError::Authentication(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_status_overloaded_by_type() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = AnthropicError::from_status(529, body, None);
        assert!(matches!(err, AnthropicError::Overloaded(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AnthropicError::Network("reset".into()).is_retryable());
        assert!(!AnthropicError::InvalidRequest("bad".into()).is_retryable());
        assert!(!AnthropicError::Configuration("missing".into()).is_retryable());
    }
}
