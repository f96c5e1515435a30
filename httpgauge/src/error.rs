use std::net::SocketAddr;
use thiserror::Error;

/// Errors that abort a benchmark run.
///
/// Timeouts and resets of individual attempts are not errors: they are
/// counted as [`crate::request::Outcome`] values. Everything in this enum
/// means the run cannot produce meaningful numbers.
#[derive(Error, Debug)]
pub enum GaugeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target URL is malformed or uses an unsupported scheme
    #[error("Invalid target URL: {0}")]
    InvalidUrl(String),

    /// Target host could not be resolved
    #[error("Failed to resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: u16,
        reason: String,
    },

    /// The target actively refused the connection
    #[error("Connection refused by {addr}; is the target serving?")]
    ConnectionRefused { addr: SocketAddr },

    /// The server response violated HTTP framing
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Body length did not match the declared content-length
    #[error("Body length mismatch: content-length declared {expected} bytes, read {actual}")]
    BodyLengthMismatch { expected: u64, actual: u64 },

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An attempt task panicked or was cancelled
    #[error("Attempt task failed: {0}")]
    TaskFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using GaugeError
pub type Result<T> = std::result::Result<T, GaugeError>;

impl From<String> for GaugeError {
    fn from(s: String) -> Self {
        GaugeError::Other(s)
    }
}

impl From<&str> for GaugeError {
    fn from(s: &str) -> Self {
        GaugeError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for GaugeError {
    fn from(err: serde_json::Error) -> Self {
        GaugeError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for GaugeError {
    fn from(err: toml::ser::Error) -> Self {
        GaugeError::Serialization(err.to_string())
    }
}

impl From<::config::ConfigError> for GaugeError {
    fn from(err: ::config::ConfigError) -> Self {
        GaugeError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for GaugeError {
    fn from(err: tokio::task::JoinError) -> Self {
        GaugeError::TaskFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GaugeError::Config("requests must be positive".to_string());
        assert_eq!(err.to_string(), "Configuration error: requests must be positive");
    }

    #[test]
    fn test_body_mismatch_display() {
        let err = GaugeError::BodyLengthMismatch {
            expected: 10,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Body length mismatch: content-length declared 10 bytes, read 4"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: GaugeError = "test error".into();
        assert!(matches!(err, GaugeError::Other(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GaugeError = io_err.into();
        assert!(matches!(err, GaugeError::Io(_)));
    }
}
