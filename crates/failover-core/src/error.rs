//! Error types for the failover controller
//!
//! This module defines all error types used throughout the crate.
//!
//! Probe failures are deliberately absent: an inconclusive probe is reported
//! as [`crate::probe::Health::Unhealthy`], never as an error.

use thiserror::Error;

/// Result type alias for failover operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the failover controller
#[derive(Error, Debug)]
pub enum Error {
    /// Transport or API-level failure reported by the DNS provider
    #[error("Provider error ({provider}){}: {message}", code_suffix(.code))]
    Provider {
        /// Provider name
        provider: String,
        /// Provider-assigned error code, if the API returned one
        code: Option<i64>,
        /// Error message
        message: String,
    },

    /// No setup has been performed (no state document exists)
    #[error("No failover configuration found; run setup first")]
    ConfigMissing,

    /// Setup was requested but a state document already exists
    #[error("Failover is already configured for alias {0}; run cleanup first")]
    AlreadyConfigured(String),

    /// A monitor is already running for this configuration
    #[error("Monitor already running (pid {pid})")]
    ConcurrentStartRejected {
        /// Process id recorded in the liveness marker
        pid: u32,
    },

    /// The requested action is not allowed while the monitor is alive
    #[error("Monitor is running (pid {pid}); stop it first")]
    MonitorActive {
        /// Process id recorded in the liveness marker
        pid: u32,
    },

    /// Compare-and-swap found a different revision than expected
    #[error("State conflict: expected revision {expected:?}, found {found:?}")]
    StateConflict {
        /// Revision the writer based its update on
        expected: Option<u64>,
        /// Revision currently stored
        found: Option<u64>,
    },

    /// The mutation lock could not be acquired in time
    #[error("Timed out waiting for mutation lock {0}")]
    LockTimeout(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" [code {c}]")).unwrap_or_default()
}

/// How a caller should treat a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; the same operation may succeed on a later attempt or tick
    Retryable,
    /// Needs operator intervention (configuration, setup, concurrent start)
    Fatal,
}

impl Error {
    /// Create a provider error without an API error code
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            code: None,
            message: message.into(),
        }
    }

    /// Create a provider error carrying the API error code
    pub fn provider_code(
        provider: impl Into<String>,
        code: i64,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            code: Some(code),
            message: message.into(),
        }
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Classify the error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Provider { .. }
            | Error::StateConflict { .. }
            | Error::LockTimeout(_)
            | Error::StateStore(_)
            | Error::Io(_)
            | Error::Other(_) => ErrorClass::Retryable,
            Error::ConfigMissing
            | Error::AlreadyConfigured(_)
            | Error::ConcurrentStartRejected { .. }
            | Error::MonitorActive { .. }
            | Error::Config(_)
            | Error::InvalidInput(_)
            | Error::Json(_) => ErrorClass::Fatal,
        }
    }

    /// Shorthand for `self.class() == ErrorClass::Retryable`
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display_includes_code() {
        let err = Error::provider_code("cloudflare", 81044, "Record does not exist");
        assert_eq!(
            err.to_string(),
            "Provider error (cloudflare) [code 81044]: Record does not exist"
        );

        let err = Error::provider("cloudflare", "timeout");
        assert_eq!(err.to_string(), "Provider error (cloudflare): timeout");
    }

    #[test]
    fn classification() {
        assert!(Error::provider("x", "boom").is_retryable());
        assert!(Error::LockTimeout("state.lock".into()).is_retryable());
        assert_eq!(Error::ConfigMissing.class(), ErrorClass::Fatal);
        assert_eq!(
            Error::ConcurrentStartRejected { pid: 42 }.class(),
            ErrorClass::Fatal
        );
    }
}
