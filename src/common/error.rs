//! Error types for the relayd client
//!
//! One tagged enum covers the whole taxonomy: connection failures,
//! per-call timeouts, daemon-reported errors, parse errors, caller
//! validation errors, and rate limiting. Handling sites match on the
//! variant instead of probing error text.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the relayd client
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Not connected to the daemon. Call connect() first")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed while waiting for a response")]
    ConnectionClosed,

    #[error("Failed to start daemon process: {0}")]
    DaemonStartFailed(String),

    #[error("Reconnect attempts exhausted after {attempts} tries; manual reconnect required")]
    ReconnectExhausted { attempts: u32 },

    // === Call Errors ===
    #[error("Request '{method}' timed out after {timeout_secs} seconds")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("Daemon returned error {code}: {message}")]
    Daemon { code: i64, message: String },

    #[error("Rate limited by daemon{}", retry_after_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to parse daemon output: {0}")]
    Parse(String),

    // === Validation Errors ===
    #[error("Invalid argument '{field}': {reason}")]
    Validation { field: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === HTTP Transport Errors ===
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

fn retry_after_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl Error {
    /// Create a validation error
    pub fn validation(field: &str, reason: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error for a specific method
    pub fn timeout(method: &str, timeout: Duration) -> Self {
        Self::Timeout {
            method: method.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// True for errors where retrying the call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::ConnectionClosed
                | Self::Connection(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display_includes_hint() {
        let err = Error::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(err.to_string().contains("retry after 30s"));

        let err = Error::RateLimited { retry_after: None };
        assert!(!err.to_string().contains("retry after"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionClosed.is_retryable());
        assert!(!Error::validation("recipient", "empty").is_retryable());
        assert!(!Error::NotConnected.is_retryable());
    }
}
