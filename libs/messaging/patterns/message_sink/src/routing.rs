//! Message router: the single stage between the unmarshallers and the sinks

use crate::SinkManager;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use types::Envelope;

#[derive(Debug, Clone)]
pub struct MessageRouter {
    manager: Arc<SinkManager>,
}

impl MessageRouter {
    pub fn new(manager: Arc<SinkManager>) -> Self {
        Self { manager }
    }

    /// Hand one envelope to the sink manager's fan-out
    #[inline]
    pub fn route(&self, envelope: Arc<Envelope>) {
        self.manager.send_to(envelope);
    }

    /// Route until the input closes or shutdown is signalled
    ///
    /// Envelopes are pulled one at a time, so a stalled router applies
    /// backpressure to the unmarshallers through the bounded input.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<Arc<Envelope>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut routed = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = input.recv() => match next {
                    Some(envelope) => {
                        self.route(envelope);
                        routed += 1;
                    }
                    None => break,
                },
            }
        }
        debug!(routed, "Message router stopped");
    }
}
