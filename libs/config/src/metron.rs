//! Agent (metron) configuration

use crate::doppler::default_log_level;
use crate::loader::Validate;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client-side TLS material used when dialing `tls://` aggregators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsClientConfig {
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub key_file: String,
    #[serde(default)]
    pub ca_file: String,
    /// Name to verify the server certificate against; the dial host is used
    /// when empty
    #[serde(default)]
    pub server_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetronConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_incoming_udp_port")]
    pub incoming_udp_port: u16,

    #[serde(default)]
    pub shared_secret: String,

    /// `udp://host:port` or `tls://host:port`
    #[serde(default)]
    pub doppler_addresses: Vec<String>,

    #[serde(default)]
    pub tls_client: Option<TlsClientConfig>,

    #[serde(default = "default_unmarshaller_count")]
    pub unmarshaller_count: usize,

    /// Upper bound on one write to a `tls://` aggregator
    #[serde(default = "default_tls_write_timeout_seconds")]
    pub tls_write_timeout_seconds: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_incoming_udp_port() -> u16 {
    3456
}

fn default_unmarshaller_count() -> usize {
    1
}

fn default_tls_write_timeout_seconds() -> u64 {
    5
}

impl MetronConfig {
    pub fn tls_write_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_write_timeout_seconds)
    }

    pub fn uses_tls(&self) -> bool {
        self.doppler_addresses
            .iter()
            .any(|address| address.starts_with("tls://"))
    }
}

impl Validate for MetronConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.shared_secret.is_empty() {
            return Err(ConfigError::missing(
                "shared_secret",
                "outgoing datagrams must be signed",
            ));
        }
        if self.doppler_addresses.is_empty() {
            return Err(ConfigError::missing(
                "doppler_addresses",
                "at least one aggregator address is required",
            ));
        }
        if self.tls_write_timeout_seconds == 0 {
            return Err(ConfigError::missing(
                "tls_write_timeout_seconds",
                "writes to aggregators must be bounded",
            ));
        }
        if self.unmarshaller_count == 0 {
            return Err(ConfigError::missing(
                "unmarshaller_count",
                "at least one unmarshalling worker is required",
            ));
        }

        for address in &self.doppler_addresses {
            let rest = address
                .strip_prefix("udp://")
                .or_else(|| address.strip_prefix("tls://"))
                .ok_or_else(|| {
                    ConfigError::invalid_address(address, "scheme must be udp:// or tls://")
                })?;
            if !rest.contains(':') {
                return Err(ConfigError::invalid_address(address, "missing port"));
            }
        }

        if self.uses_tls() {
            match &self.tls_client {
                Some(tls) if !tls.ca_file.is_empty() => {}
                _ => {
                    return Err(ConfigError::InvalidTls(
                        "tls:// aggregators need tls_client.ca_file".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }
}
