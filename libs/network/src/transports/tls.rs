//! TLS delivery endpoint
//!
//! The connection is dialed on first write and again after every `close()`.
//! Each `write` is one `write_all` plus flush on the shared stream, bounded
//! by the IO timeout. A timed-out write drops the stream.

use super::{Client, Scheme, DEFAULT_IO_TIMEOUT};
use crate::{Result, TransportError};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

pub struct TlsClient {
    scheme: Scheme,
    address: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    dial_timeout: Duration,
    io_timeout: Duration,
    stream: Mutex<Option<TlsStream<TcpStream>>>,
    frame_lock: Mutex<()>,
}

impl std::fmt::Debug for TlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClient")
            .field("address", &self.address)
            .field("dial_timeout", &self.dial_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

/// Host part of `host:port`, with IPv6 brackets removed
pub(crate) fn host_of(address: &str) -> &str {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

impl TlsClient {
    pub fn new(
        address: impl Into<String>,
        config: Arc<ClientConfig>,
        dial_timeout: Duration,
    ) -> Result<Self> {
        let address = address.into();
        let server_name = crate::tls::server_name(host_of(&address))?;
        Ok(Self {
            scheme: Scheme::Tls,
            address,
            server_name,
            connector: TlsConnector::from(config),
            dial_timeout,
            io_timeout: DEFAULT_IO_TIMEOUT,
            stream: Mutex::new(None),
            frame_lock: Mutex::new(()),
        })
    }

    /// Bound every write (including flush) to `io_timeout`
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Verify the server certificate against `name` instead of the dial host
    pub fn with_server_name(mut self, name: &str) -> Result<Self> {
        self.server_name = crate::tls::server_name(name)?;
        Ok(self)
    }

    async fn dial(&self) -> Result<TlsStream<TcpStream>> {
        let timeout_ms = self.dial_timeout.as_millis() as u64;
        let connect = async {
            let tcp = TcpStream::connect(self.address.as_str())
                .await
                .map_err(|e| TransportError::connection_with_source("TCP connect failed", None, e))?;
            let remote = tcp.peer_addr().ok();
            tcp.set_nodelay(true).ok();
            self.connector
                .connect(self.server_name.clone(), tcp)
                .await
                .map_err(|e| TransportError::connection_with_source("TLS handshake failed", remote, e))
        };

        let stream = timeout(self.dial_timeout, connect)
            .await
            .map_err(|_| TransportError::timeout(format!("TLS dial {}", self.address), timeout_ms))??;
        info!(address = %self.address, "TLS client connected");
        Ok(stream)
    }
}

fn into_io(err: TransportError) -> io::Error {
    match err {
        TransportError::Timeout { .. } => io::Error::new(io::ErrorKind::TimedOut, err.to_string()),
        other => io::Error::new(io::ErrorKind::ConnectionRefused, other.to_string()),
    }
}

#[async_trait]
impl Client for TlsClient {
    fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await.map_err(into_io)?);
        }
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no TLS stream"))?;
        let write = async {
            stream.write_all(data).await?;
            stream.flush().await
        };
        match timeout(self.io_timeout, write).await {
            Ok(result) => result.map(|()| data.len()),
            Err(_) => {
                // a partial record leaves the session unusable
                guard.take();
                debug!(address = %self.address, timeout = ?self.io_timeout, "TLS write timed out");
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write to {} timed out after {:?}", self.address, self.io_timeout),
                ))
            }
        }
    }

    async fn close(&self) -> io::Result<()> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            debug!(address = %self.address, "Closing TLS client");
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn frame_lock(&self) -> &Mutex<()> {
        &self.frame_lock
    }
}
