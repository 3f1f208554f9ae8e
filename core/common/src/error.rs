//! Common error types for filerelay.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for filerelay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or remote API failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The authentication surface failed to launch or reported a failure.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The user dismissed the authentication surface.
    #[error("Authentication cancelled by user")]
    AuthCancelled,

    /// The authentication surface finished on a URL outside the expected redirect.
    #[error("Callback URL {received} does not match redirect {expected}")]
    CallbackMismatch { expected: String, received: String },

    /// A request chain kept demanding authentication.
    #[error("Authentication still required after {0} attempts")]
    AuthRetriesExhausted(u32),

    /// No resume signal arrived for a parked request in time.
    #[error("No authentication redirect received within {0:?}")]
    AuthTimeout(Duration),

    /// Too many requests are already parked awaiting authentication.
    #[error("Too many pending requests (limit {0})")]
    TooManyPending(usize),

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error came from the interactive authentication step.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_)
                | Error::AuthCancelled
                | Error::CallbackMismatch { .. }
                | Error::AuthRetriesExhausted(_)
                | Error::AuthTimeout(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_classification() {
        assert!(Error::AuthCancelled.is_auth_failure());
        assert!(Error::AuthRetriesExhausted(3).is_auth_failure());
        assert!(Error::AuthTimeout(Duration::from_secs(1)).is_auth_failure());
        assert!(!Error::Cancelled.is_auth_failure());
        assert!(!Error::Network("down".to_string()).is_auth_failure());
    }

    #[test]
    fn test_callback_mismatch_message() {
        let err = Error::CallbackMismatch {
            expected: "app://cb".to_string(),
            received: "app://other".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Callback URL app://other does not match redirect app://cb"
        );
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
