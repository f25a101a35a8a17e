//! Doppler forwarder
//!
//! Sends each envelope to one randomly chosen aggregator endpoint. Datagram
//! endpoints get the signed payload in one write; stream endpoints get a
//! 4-byte little-endian length prefix followed by the unsigned payload.
//!
//! Every failure drops the single envelope it concerns. A failed stream
//! write closes that client, since a partial frame leaves the stream
//! unusable.

use codec::{length_prefix, marshal, Signer, LENGTH_PREFIX_SIZE};
use network::{Client, ClientPool, Counters, DopplerClient, Scheme};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};
use types::{EventType, Envelope};

pub const MARSHAL_ERROR_COUNTER: &str = "dropsondeMarshaller.marshalErrors";
pub const SENT_MESSAGES_COUNTER: &str = "DopplerForwarder.sentMessages";

pub const UDP_SENT_MESSAGES: &str = "udp.sentMessageCount";
pub const UDP_SENT_BYTES: &str = "udp.sentByteCount";
pub const UDP_SEND_ERRORS: &str = "udp.sendErrorCount";
pub const TLS_SENT_MESSAGES: &str = "tls.sentMessageCount";
pub const TLS_SENT_BYTES: &str = "tls.sentByteCount";
pub const TLS_SEND_ERRORS: &str = "tls.sendErrorCount";

/// Per-event-type counter bumped after a successful send
pub fn marshalled_counter(event_type: EventType) -> String {
    format!("dropsondeMarshaller.{}Marshalled", event_type.metric_key())
}

/// What happened to one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    /// No endpoint to send to
    NoClient,
    MarshalFailed,
    WriteFailed,
    UnknownScheme,
}

pub struct Forwarder<C: Client = DopplerClient> {
    pool: Arc<ClientPool<C>>,
    signer: Signer,
    counters: Arc<Counters>,
}

impl<C: Client> std::fmt::Debug for Forwarder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("clients", &self.pool.len())
            .finish_non_exhaustive()
    }
}

impl<C: Client> Forwarder<C> {
    pub fn new(pool: Arc<ClientPool<C>>, signer: Signer, counters: Arc<Counters>) -> Self {
        Self {
            pool,
            signer,
            counters,
        }
    }

    pub fn pool(&self) -> &Arc<ClientPool<C>> {
        &self.pool
    }

    /// Forward one envelope; safe to call from many tasks at once
    pub async fn write(&self, envelope: &Envelope) -> Outcome {
        let client = match self.pool.random_client() {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Can't forward message");
                return Outcome::NoClient;
            }
        };

        let payload = match marshal(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Marshal error");
                self.counters.increment(MARSHAL_ERROR_COUNTER);
                return Outcome::MarshalFailed;
            }
        };

        let outcome = match client.scheme() {
            Scheme::Udp => self.send_datagram(client.as_ref(), &payload).await,
            Scheme::Tls => self.send_frame(client.as_ref(), &payload).await,
            Scheme::Other(scheme) => {
                error!(scheme = %scheme, address = %client.address(), "Unknown protocol");
                Outcome::UnknownScheme
            }
        };

        if outcome == Outcome::Sent {
            self.counters
                .increment(&marshalled_counter(envelope.event_type()));
            self.counters.increment(SENT_MESSAGES_COUNTER);
        }
        outcome
    }

    async fn send_datagram(&self, client: &C, payload: &[u8]) -> Outcome {
        let signed = self.signer.sign(payload);
        match client.write(&signed).await {
            Ok(written) => {
                self.counters.increment(UDP_SENT_MESSAGES);
                self.counters.add(UDP_SENT_BYTES, written as u64);
                Outcome::Sent
            }
            Err(e) => {
                self.counters.increment(UDP_SEND_ERRORS);
                debug!(scheme = "udp", address = %client.address(), error = %e, "Error writing message");
                Outcome::WriteFailed
            }
        }
    }

    async fn send_frame(&self, client: &C, payload: &[u8]) -> Outcome {
        let prefix = match length_prefix(payload.len()) {
            Ok(prefix) => prefix,
            Err(e) => {
                error!(error = %e, "Payload too large to frame");
                self.counters.increment(MARSHAL_ERROR_COUNTER);
                return Outcome::MarshalFailed;
            }
        };

        let written = {
            let _frame = client.frame_lock().lock().await;
            let written = match client.write(&prefix).await {
                Ok(_) => client.write(payload).await,
                Err(e) => Err(e),
            };
            // close before another sender can start a frame on the broken stream
            if written.is_err() {
                if let Err(close_err) = client.close().await {
                    debug!(address = %client.address(), error = %close_err, "Error closing client");
                }
            }
            written
        };

        match written {
            Ok(written) => {
                self.counters.increment(TLS_SENT_MESSAGES);
                self.counters
                    .add(TLS_SENT_BYTES, (written + LENGTH_PREFIX_SIZE) as u64);
                Outcome::Sent
            }
            Err(e) => {
                self.counters.increment(TLS_SEND_ERRORS);
                error!(scheme = "tls", address = %client.address(), error = %e, "Streaming error");
                Outcome::WriteFailed
            }
        }
    }

    /// Forward envelopes until the input closes or shutdown is signalled
    pub async fn run(
        self,
        mut input: mpsc::Receiver<Arc<Envelope>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = input.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.write(&envelope).await;
        }
        debug!("Forwarder stopped");
    }
}
