//! Aggregator (doppler) configuration

use crate::ip_range::{parse_ranges, IpRange, ParsedIpRange};
use crate::loader::Validate;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Secure (TLS) listener settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsListenerConfig {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub key_file: String,
    /// Client CA bundle; when set, peers must present a certificate signed by it
    #[serde(default)]
    pub ca_file: String,
}

/// A drain binding known at startup, fed to the sink manager as a registry
/// `add` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticDrain {
    pub app_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DopplerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_incoming_udp_port")]
    pub incoming_udp_port: u16,

    /// Log messages kept per application for recent-log queries
    #[serde(default)]
    pub max_retained_log_messages: u32,

    /// Per-sink buffer capacity
    #[serde(default = "default_message_drain_buffer_size")]
    pub message_drain_buffer_size: usize,

    #[serde(default)]
    pub shared_secret: String,

    #[serde(default)]
    pub sink_skip_cert_verify: bool,

    #[serde(default)]
    pub blacklist_ips: Vec<IpRange>,

    #[serde(default)]
    pub container_metric_ttl_seconds: u64,

    #[serde(default)]
    pub sink_inactivity_timeout_seconds: u64,

    #[serde(default)]
    pub sink_io_timeout_seconds: u64,

    #[serde(default = "default_sink_dial_timeout_seconds")]
    pub sink_dial_timeout_seconds: u64,

    #[serde(default = "default_unmarshaller_count")]
    pub unmarshaller_count: usize,

    #[serde(default)]
    pub enable_tls_transport: bool,

    #[serde(default)]
    pub tls_listener: TlsListenerConfig,

    #[serde(default)]
    pub drains: Vec<StaticDrain>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_incoming_udp_port() -> u16 {
    3457
}

fn default_message_drain_buffer_size() -> usize {
    100
}

fn default_sink_dial_timeout_seconds() -> u64 {
    1
}

fn default_unmarshaller_count() -> usize {
    1
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}

impl DopplerConfig {
    pub fn container_metric_ttl(&self) -> Duration {
        Duration::from_secs(self.container_metric_ttl_seconds)
    }

    pub fn sink_inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_inactivity_timeout_seconds)
    }

    pub fn sink_io_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_io_timeout_seconds)
    }

    pub fn sink_dial_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_dial_timeout_seconds)
    }

    /// Parsed blacklist ranges; only valid after [`Validate::validate`]
    pub fn blacklist_ranges(&self) -> Result<Vec<ParsedIpRange>, ConfigError> {
        parse_ranges(&self.blacklist_ips)
    }
}

impl Validate for DopplerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retained_log_messages == 0 {
            return Err(ConfigError::missing(
                "max_retained_log_messages",
                "need max number of log messages to retain per application",
            ));
        }
        if self.container_metric_ttl_seconds == 0 {
            return Err(ConfigError::missing(
                "container_metric_ttl_seconds",
                "container metrics need an expiry",
            ));
        }
        if self.sink_inactivity_timeout_seconds == 0 {
            return Err(ConfigError::missing(
                "sink_inactivity_timeout_seconds",
                "idle sinks need an eviction timeout",
            ));
        }
        if self.sink_io_timeout_seconds == 0 {
            return Err(ConfigError::missing(
                "sink_io_timeout_seconds",
                "sink writes need a timeout",
            ));
        }
        if self.message_drain_buffer_size == 0 {
            return Err(ConfigError::missing(
                "message_drain_buffer_size",
                "sink buffers need a capacity",
            ));
        }
        if self.shared_secret.is_empty() {
            return Err(ConfigError::missing(
                "shared_secret",
                "incoming datagrams cannot be verified without it",
            ));
        }
        if self.unmarshaller_count == 0 {
            return Err(ConfigError::missing(
                "unmarshaller_count",
                "at least one unmarshalling worker is required",
            ));
        }

        parse_ranges(&self.blacklist_ips)?;

        if self.enable_tls_transport {
            let tls = &self.tls_listener;
            if tls.cert_file.is_empty() || tls.key_file.is_empty() || tls.port == 0 {
                return Err(ConfigError::InvalidTls(
                    "invalid TLS listener configuration".to_string(),
                ));
            }
        }

        for drain in &self.drains {
            if drain.app_id.is_empty() || drain.url.is_empty() {
                return Err(ConfigError::invalid_address(
                    &drain.url,
                    "static drains need an app id and a URL",
                ));
            }
        }

        Ok(())
    }
}
