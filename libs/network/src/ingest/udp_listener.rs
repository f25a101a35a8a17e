//! UDP network reader
//!
//! Reads whole datagrams and hands each one downstream as an owned buffer.
//! Sending downstream awaits channel capacity, so a slow consumer slows the
//! reader rather than growing memory; the kernel drops what does not fit.

use crate::metrics::Counters;
use crate::{Result, TransportError};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Largest datagram accepted
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

pub struct NetworkReader {
    name: String,
    socket: UdpSocket,
    output: mpsc::Sender<Bytes>,
    counters: Arc<Counters>,
}

impl NetworkReader {
    /// Bind the listening socket; `name` prefixes this reader's counters
    pub async fn bind(
        name: impl Into<String>,
        address: SocketAddr,
        output: mpsc::Sender<Bytes>,
        counters: Arc<Counters>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(address).await.map_err(|e| {
            TransportError::network_with_source(format!("Failed to bind UDP socket on {address}"), e)
        })?;
        let name = name.into();
        info!(name = %name, address = %socket.local_addr()?, "UDP listener bound");
        Ok(Self {
            name,
            socket,
            output,
            counters,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Read until shutdown, a socket error, or the consumer going away
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let received_messages = format!("{}.receivedMessageCount", self.name);
        let received_bytes = format!("{}.receivedByteCount", self.name);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (n, peer) = tokio::select! {
                _ = shutdown.changed() => break,
                read = self.socket.recv_from(&mut buf) => match read {
                    Ok(read) => read,
                    Err(e) => {
                        warn!(name = %self.name, error = %e, "UDP read failed, stopping listener");
                        break;
                    }
                },
            };

            self.counters.increment(&received_messages);
            self.counters.add(&received_bytes, n as u64);
            debug!(name = %self.name, %peer, bytes = n, "Datagram received");

            let datagram = Bytes::copy_from_slice(&buf[..n]);
            tokio::select! {
                _ = shutdown.changed() => break,
                sent = self.output.send(datagram) => {
                    if sent.is_err() {
                        debug!(name = %self.name, "Consumer closed, stopping listener");
                        break;
                    }
                }
            }
        }

        info!(name = %self.name, "UDP listener stopped");
    }
}
