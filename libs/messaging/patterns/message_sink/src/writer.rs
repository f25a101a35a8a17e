//! Syslog destination writer
//!
//! Delivers RFC5424 lines to an external drain. The drain URL scheme picks
//! the transport once, at construction:
//! - `syslog://host:port`: plain TCP, one line per message
//! - `syslog-tls://host:port`: the same over TLS
//! - `https://host/path`: one POST per message with the line as body;
//!   redirects are not followed and count as failed writes
//!
//! Dialing takes pre-resolved addresses so the caller can run the blacklist
//! check on exactly the addresses that get dialed.

use crate::SinkError;
use codec::format_syslog;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};
use url::Url;

const DEFAULT_SYSLOG_PORT: u16 = 514;
const DEFAULT_SYSLOG_TLS_PORT: u16 = 6514;

/// Settings shared by every writer the sink manager creates
#[derive(Clone)]
pub struct WriterSettings {
    pub dial_timeout: Duration,
    pub io_timeout: Duration,
    pub skip_cert_verify: bool,
    /// Client config for `syslog-tls` drains
    pub tls_config: Arc<ClientConfig>,
}

impl std::fmt::Debug for WriterSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterSettings")
            .field("dial_timeout", &self.dial_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("skip_cert_verify", &self.skip_cert_verify)
            .finish_non_exhaustive()
    }
}

enum Transport {
    Syslog {
        conn: Option<TcpStream>,
    },
    SyslogTls {
        connector: TlsConnector,
        server_name: ServerName<'static>,
        conn: Option<TlsStream<TcpStream>>,
    },
    Https {
        client: Option<reqwest::Client>,
    },
}

pub struct SyslogWriter {
    url: Url,
    app_id: String,
    host: String,
    port: u16,
    settings: WriterSettings,
    transport: Transport,
}

impl std::fmt::Debug for SyslogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyslogWriter")
            .field("url", &self.url.as_str())
            .field("app_id", &self.app_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Parse a drain URL, rejecting what no writer can serve
pub fn parse_drain_url(raw: &str) -> Result<Url, SinkError> {
    let url = Url::parse(raw).map_err(|e| SinkError::invalid_url(raw, e.to_string()))?;
    match url.scheme() {
        "syslog" | "syslog-tls" | "https" => {}
        other => {
            return Err(SinkError::UnknownScheme {
                scheme: other.to_string(),
                url: raw.to_string(),
            })
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SinkError::invalid_url(raw, "missing host"));
    }
    Ok(url)
}

impl SyslogWriter {
    pub fn new(raw_url: &str, app_id: impl Into<String>, settings: &WriterSettings) -> Result<Self, SinkError> {
        let url = parse_drain_url(raw_url)?;
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| SinkError::invalid_url(raw_url, "missing host"))?;

        let (port, transport) = match url.scheme() {
            "syslog" => (
                url.port().unwrap_or(DEFAULT_SYSLOG_PORT),
                Transport::Syslog { conn: None },
            ),
            "syslog-tls" => {
                let server_name = ServerName::try_from(host.clone())
                    .map_err(|_| SinkError::invalid_url(raw_url, "host is not a valid server name"))?;
                (
                    url.port().unwrap_or(DEFAULT_SYSLOG_TLS_PORT),
                    Transport::SyslogTls {
                        connector: TlsConnector::from(Arc::clone(&settings.tls_config)),
                        server_name,
                        conn: None,
                    },
                )
            }
            _ => (
                url.port_or_known_default().unwrap_or(443),
                Transport::Https { client: None },
            ),
        };

        Ok(Self {
            url,
            app_id: app_id.into(),
            host,
            port,
            settings: settings.clone(),
            transport,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host to resolve before dialing
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        match &self.transport {
            Transport::Syslog { conn } => conn.is_some(),
            Transport::SyslogTls { conn, .. } => conn.is_some(),
            Transport::Https { client } => client.is_some(),
        }
    }

    /// Resolve the host without any blacklist check, then dial
    pub async fn connect(&mut self) -> Result<(), SinkError> {
        let addresses: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();
        self.connect_to(&addresses).await
    }

    /// Dial one of the given addresses within the dial timeout
    pub async fn connect_to(&mut self, addresses: &[SocketAddr]) -> Result<(), SinkError> {
        if addresses.is_empty() {
            return Err(SinkError::connection_failed(format!(
                "{} resolved to no addresses",
                self.host
            )));
        }
        let dial_timeout = self.settings.dial_timeout;

        match &mut self.transport {
            Transport::Syslog { conn } => {
                let stream = timeout(dial_timeout, TcpStream::connect(addresses))
                    .await
                    .map_err(|_| SinkError::timeout(dial_timeout))?
                    .map_err(|e| SinkError::connection_failed(e.to_string()))?;
                *conn = Some(stream);
            }
            Transport::SyslogTls {
                connector,
                server_name,
                conn,
            } => {
                let dial = async {
                    let tcp = TcpStream::connect(addresses).await?;
                    connector.connect(server_name.clone(), tcp).await
                };
                let stream = timeout(dial_timeout, dial)
                    .await
                    .map_err(|_| SinkError::timeout(dial_timeout))?
                    .map_err(|e| SinkError::connection_failed(e.to_string()))?;
                *conn = Some(stream);
            }
            Transport::Https { client } => {
                let built = reqwest::Client::builder()
                    .use_rustls_tls()
                    .connect_timeout(dial_timeout)
                    .timeout(self.settings.io_timeout)
                    .danger_accept_invalid_certs(self.settings.skip_cert_verify)
                    .redirect(reqwest::redirect::Policy::none())
                    .resolve_to_addrs(&self.host, addresses)
                    .build()
                    .map_err(|e| SinkError::connection_failed(e.to_string()))?;
                *client = Some(built);
            }
        }

        info!(app_id = %self.app_id, url = %self.url, "Connected to drain");
        Ok(())
    }

    /// Format and deliver one message, returning the bytes written
    pub async fn write(
        &mut self,
        priority: i32,
        payload: &[u8],
        source_type: &str,
        source_id: &str,
        timestamp_nanos: i64,
    ) -> Result<usize, SinkError> {
        let line = format_syslog(
            priority,
            &self.app_id,
            source_type,
            source_id,
            payload,
            timestamp_nanos,
        );
        let io_timeout = self.settings.io_timeout;

        match &mut self.transport {
            Transport::Syslog { conn } => {
                let stream = conn.as_mut().ok_or(SinkError::ConnectionLost("not connected".into()))?;
                write_line(stream, &line, io_timeout).await?;
            }
            Transport::SyslogTls { conn, .. } => {
                let stream = conn.as_mut().ok_or(SinkError::ConnectionLost("not connected".into()))?;
                write_line(stream, &line, io_timeout).await?;
            }
            Transport::Https { client } => {
                let client = client.as_ref().ok_or(SinkError::ConnectionLost("not connected".into()))?;
                let response = client
                    .post(self.url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "text/plain")
                    .body(line.clone())
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            SinkError::timeout(io_timeout)
                        } else {
                            SinkError::write_failed(e.to_string())
                        }
                    })?;
                if response.status().is_redirection() {
                    return Err(SinkError::write_failed(format!(
                        "drain redirected with {}, not following",
                        response.status()
                    )));
                }
                if !response.status().is_success() {
                    return Err(SinkError::write_failed(format!(
                        "drain answered {}",
                        response.status()
                    )));
                }
            }
        }

        debug!(app_id = %self.app_id, bytes = line.len(), "Wrote syslog message");
        Ok(line.len())
    }

    /// Drop the connection; `connect_to` must run again before writing
    pub async fn close(&mut self) -> Result<(), SinkError> {
        match &mut self.transport {
            Transport::Syslog { conn } => {
                if let Some(mut stream) = conn.take() {
                    stream.shutdown().await?;
                }
            }
            Transport::SyslogTls { conn, .. } => {
                if let Some(mut stream) = conn.take() {
                    stream.shutdown().await?;
                }
            }
            Transport::Https { client } => {
                client.take();
            }
        }
        Ok(())
    }
}

async fn write_line<W>(stream: &mut W, line: &[u8], io_timeout: Duration) -> Result<(), SinkError>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(line).await?;
        stream.flush().await
    };
    timeout(io_timeout, write)
        .await
        .map_err(|_| SinkError::timeout(io_timeout))?
        .map_err(|e| SinkError::write_failed(e.to_string()))
}
