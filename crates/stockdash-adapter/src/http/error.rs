/*
[INPUT]:  Error sources (HTTP, API envelope, serialization, WebSocket)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the dashboard transport adapter
#[derive(Error, Debug)]
pub enum AdapterError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Resource does not exist on the backend
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend does not expose this endpoint
    #[error("Endpoint not supported by backend: {endpoint}")]
    NotSupported { endpoint: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out
    #[error("Timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl AdapterError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Http(_)
            | AdapterError::Timeout { .. }
            | AdapterError::WebSocket(_)
            | AdapterError::InvalidResponse(_) => true,
            AdapterError::Api { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        AdapterError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }

    pub fn timeout(duration: std::time::Duration) -> Self {
        AdapterError::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_retryable() {
        let timeout_err = AdapterError::timeout(Duration::from_secs(3));
        assert!(timeout_err.is_retryable());
        assert!(AdapterError::api_error(StatusCode::BAD_GATEWAY, "upstream").is_retryable());

        assert!(!AdapterError::NotFound("task".into()).is_retryable());
        assert!(!AdapterError::api_error(StatusCode::BAD_REQUEST, "bad").is_retryable());
    }

    #[test]
    fn test_api_error_creation() {
        let err = AdapterError::api_error(StatusCode::BAD_REQUEST, "Invalid stock code");
        match err {
            AdapterError::Api { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "Invalid stock code");
            }
            _ => panic!("Expected Api error variant"),
        }
    }
}
