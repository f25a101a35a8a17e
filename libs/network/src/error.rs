//! Transport Error Types
//!
//! Errors raised by delivery endpoints, the client pool, the destination
//! blacklist and the ingestion listeners. None of them is fatal once a
//! service is running: callers count them and drop the affected message.

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration errors, including unknown address schemes
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// TLS material could not be loaded
    #[error("Security error: {message}")]
    Security { message: String },

    /// Transport timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error with source
    pub fn network_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: std::io::Error,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(source),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// The client pool has no members to choose from
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("Client pool exhausted: no delivery endpoints registered")]
    Exhausted,
}

/// A destination resolved to an address inside a blacklisted range
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Destination {host} resolves to blacklisted address {address}")]
pub struct BlacklistViolation {
    pub host: String,
    pub address: IpAddr,
}

/// Outcome of a blacklist check that could not complete or was refused
#[derive(Error, Debug)]
pub enum BlacklistError {
    #[error(transparent)]
    Violation(#[from] BlacklistViolation),

    #[error("Could not resolve destination {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Destination {host} resolved to no addresses")]
    NoAddresses { host: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion_keeps_source() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, TransportError::Io { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_violation_display_names_address() {
        let violation = BlacklistViolation {
            host: "drain.internal".to_string(),
            address: "10.0.0.5".parse().unwrap(),
        };
        let text = BlacklistError::from(violation).to_string();
        assert!(text.contains("10.0.0.5"));
        assert!(text.contains("drain.internal"));
    }
}
