//! Secure stream listener
//!
//! Accepts TLS connections and reads length-prefixed, unsigned envelopes.
//! A bad frame ends only the connection it arrived on. A handshake must
//! finish within the handshake timeout and is abandoned on shutdown.

use crate::ingest::unmarshaller::UnmarshallerPool;
use crate::metrics::Counters;
use crate::{Result, TransportError};
use codec::DEFAULT_MAX_FRAME_SIZE;
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use types::Envelope;

/// Time a peer gets to complete the TLS handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TlsListener {
    name: String,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    output: mpsc::Sender<Arc<Envelope>>,
    counters: Arc<Counters>,
    max_frame_size: usize,
    handshake_timeout: Duration,
}

impl TlsListener {
    pub async fn bind(
        name: impl Into<String>,
        address: SocketAddr,
        config: Arc<ServerConfig>,
        output: mpsc::Sender<Arc<Envelope>>,
        counters: Arc<Counters>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            TransportError::network_with_source(format!("Failed to bind TLS listener on {address}"), e)
        })?;
        let name = name.into();
        info!(name = %name, address = %listener.local_addr()?, "TLS listener bound");
        Ok(Self {
            name,
            listener,
            acceptor: TlsAcceptor::from(config),
            output,
            counters,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until shutdown, then wait for open connections to finish
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            ConnectionContext {
                                name: self.name.clone(),
                                acceptor: self.acceptor.clone(),
                                output: self.output.clone(),
                                counters: Arc::clone(&self.counters),
                                max_frame_size: self.max_frame_size,
                                handshake_timeout: self.handshake_timeout,
                            },
                            stream,
                            peer,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(name = %self.name, error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
        info!(name = %self.name, "TLS listener stopped");
    }
}

struct ConnectionContext {
    name: String,
    acceptor: TlsAcceptor,
    output: mpsc::Sender<Arc<Envelope>>,
    counters: Arc<Counters>,
    max_frame_size: usize,
    handshake_timeout: Duration,
}

async fn serve_connection(
    ctx: ConnectionContext,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let handshake = tokio::select! {
        _ = shutdown.changed() => return,
        accepted = timeout(ctx.handshake_timeout, ctx.acceptor.accept(stream)) => accepted,
    };
    let mut tls = match handshake {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            warn!(name = %ctx.name, %peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            warn!(name = %ctx.name, %peer, timeout = ?ctx.handshake_timeout, "TLS handshake timed out");
            return;
        }
    };
    debug!(name = %ctx.name, %peer, "TLS connection accepted");

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = codec::read_frame(&mut tls, ctx.max_frame_size) => frame,
        };
        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                warn!(name = %ctx.name, %peer, error = %e, "Closing connection after bad frame");
                break;
            }
        };

        ctx.counters
            .increment(&format!("{}.receivedMessageCount", ctx.name));
        ctx.counters
            .add(&format!("{}.receivedByteCount", ctx.name), payload.len() as u64);

        if let Some(envelope) = UnmarshallerPool::decode(&ctx.counters, &payload) {
            if ctx.output.send(Arc::new(envelope)).await.is_err() {
                break;
            }
        }
    }

    let _ = tls.shutdown().await;
    debug!(name = %ctx.name, %peer, "TLS connection closed");
}
