//! Delivery Endpoints
//!
//! A [`Client`] is one aggregator endpoint identified by scheme and address.
//! Concrete endpoints are a closed set, [`DopplerClient`], selected from the
//! address scheme at construction time.

pub mod tls;
pub mod udp;

pub use tls::TlsClient;
pub use udp::UdpClient;

use crate::{Result, TransportError};
use async_trait::async_trait;
use rustls::ClientConfig;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Dial timeout used for stream endpoints
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Write timeout used for stream endpoints unless configured otherwise
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport scheme of a delivery endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    Udp,
    Tls,
    Other(String),
}

impl Scheme {
    pub fn parse(scheme: &str) -> Self {
        match scheme {
            "udp" => Scheme::Udp,
            "tls" => Scheme::Tls,
            other => Scheme::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Udp => "udp",
            Scheme::Tls => "tls",
            Scheme::Other(other) => other,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One addressable delivery endpoint
#[async_trait]
pub trait Client: Send + Sync + fmt::Debug {
    fn scheme(&self) -> &Scheme;

    /// `host:port` without the scheme
    fn address(&self) -> &str;

    /// Write `data` in a single call, opening the connection if needed
    async fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Release the connection; a later write opens a fresh one
    async fn close(&self) -> io::Result<()>;

    /// Held by callers that issue several writes forming one frame
    fn frame_lock(&self) -> &Mutex<()>;
}

/// The concrete endpoints a forwarder can hold
#[derive(Debug)]
pub enum DopplerClient {
    Udp(UdpClient),
    Tls(TlsClient),
}

impl DopplerClient {
    /// Build an endpoint from `udp://host:port` or `tls://host:port`
    pub fn from_url(url: &str, tls_config: Option<Arc<ClientConfig>>) -> Result<Self> {
        let (scheme, address) = url.split_once("://").ok_or_else(|| {
            TransportError::configuration(format!("Missing scheme in {url}"), Some("address"))
        })?;

        match Scheme::parse(scheme) {
            Scheme::Udp => Ok(DopplerClient::Udp(UdpClient::new(address))),
            Scheme::Tls => {
                let config = tls_config.ok_or_else(|| {
                    TransportError::configuration(
                        format!("No TLS client configuration for {url}"),
                        Some("tls_client"),
                    )
                })?;
                Ok(DopplerClient::Tls(TlsClient::new(
                    address,
                    config,
                    DEFAULT_DIAL_TIMEOUT,
                )?))
            }
            Scheme::Other(other) => Err(TransportError::configuration(
                format!("Unknown scheme {other} in {url}"),
                Some("address"),
            )),
        }
    }
}

impl DopplerClient {
    /// Override the certificate name checked by a TLS endpoint
    pub fn with_server_name(self, name: &str) -> Result<Self> {
        match self {
            DopplerClient::Tls(client) => Ok(DopplerClient::Tls(client.with_server_name(name)?)),
            udp => Ok(udp),
        }
    }

    /// Bound writes on a TLS endpoint; datagram writes never block
    pub fn with_io_timeout(self, io_timeout: Duration) -> Self {
        match self {
            DopplerClient::Tls(client) => DopplerClient::Tls(client.with_io_timeout(io_timeout)),
            udp => udp,
        }
    }
}

#[async_trait]
impl Client for DopplerClient {
    fn scheme(&self) -> &Scheme {
        match self {
            DopplerClient::Udp(client) => client.scheme(),
            DopplerClient::Tls(client) => client.scheme(),
        }
    }

    fn address(&self) -> &str {
        match self {
            DopplerClient::Udp(client) => client.address(),
            DopplerClient::Tls(client) => client.address(),
        }
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        match self {
            DopplerClient::Udp(client) => client.write(data).await,
            DopplerClient::Tls(client) => client.write(data).await,
        }
    }

    async fn close(&self) -> io::Result<()> {
        match self {
            DopplerClient::Udp(client) => client.close().await,
            DopplerClient::Tls(client) => client.close().await,
        }
    }

    fn frame_lock(&self) -> &Mutex<()> {
        match self {
            DopplerClient::Udp(client) => client.frame_lock(),
            DopplerClient::Tls(client) => client.frame_lock(),
        }
    }
}
