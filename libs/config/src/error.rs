//! Configuration validation errors
//!
//! Every variant here is fatal at startup; none of them can occur once a
//! service is running.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {field} ({hint})")]
    MissingSetting { field: &'static str, hint: &'static str },

    #[error("Invalid IP range {start}-{end}: {reason}")]
    InvalidIpRange {
        start: String,
        end: String,
        reason: String,
    },

    #[error("Invalid TLS configuration: {0}")]
    InvalidTls(String),

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

impl ConfigError {
    pub fn missing(field: &'static str, hint: &'static str) -> Self {
        ConfigError::MissingSetting { field, hint }
    }

    pub fn invalid_ip_range(
        start: impl Into<String>,
        end: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidIpRange {
            start: start.into(),
            end: end.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }
}
