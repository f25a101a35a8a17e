//! Unmarshalling worker pool
//!
//! A fixed number of workers share one input queue and decode envelopes in
//! parallel. No ordering is kept between workers.

use crate::metrics::Counters;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info};
use types::Envelope;

pub const UNMARSHAL_ERROR_COUNTER: &str = "dropsondeUnmarshaller.unmarshalErrors";

/// Counter name for successfully decoded envelopes of one event type
pub fn received_counter(envelope: &Envelope) -> String {
    format!(
        "dropsondeUnmarshaller.{}Received",
        envelope.event_type().metric_key()
    )
}

pub struct UnmarshallerPool {
    workers: usize,
    counters: Arc<Counters>,
}

impl UnmarshallerPool {
    pub fn new(workers: usize, counters: Arc<Counters>) -> Self {
        Self {
            workers: workers.max(1),
            counters,
        }
    }

    pub fn size(&self) -> usize {
        self.workers
    }

    /// Decode one message, counting the outcome
    pub fn decode(counters: &Counters, bytes: &[u8]) -> Option<Envelope> {
        match codec::unmarshal(bytes) {
            Ok(envelope) => {
                counters.increment(&received_counter(&envelope));
                Some(envelope)
            }
            Err(e) => {
                counters.increment(UNMARSHAL_ERROR_COUNTER);
                debug!(error = %e, bytes = bytes.len(), "Dropping undecodable message");
                None
            }
        }
    }

    /// Run every worker until the input closes and all of them finish
    pub async fn run(self, input: mpsc::Receiver<Bytes>, output: mpsc::Sender<Arc<Envelope>>) {
        let input = Arc::new(Mutex::new(input));
        let mut workers = JoinSet::new();

        for _ in 0..self.workers {
            let input = Arc::clone(&input);
            let output = output.clone();
            let counters = Arc::clone(&self.counters);
            workers.spawn(async move {
                loop {
                    let next = input.lock().await.recv().await;
                    let Some(bytes) = next else { break };
                    if let Some(envelope) = Self::decode(&counters, &bytes) {
                        if output.send(Arc::new(envelope)).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
        drop(output);

        while workers.join_next().await.is_some() {}
        info!(workers = self.workers, "Unmarshaller pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{LogMessage, MessageType, Payload};

    fn log_bytes(text: &str) -> Bytes {
        let envelope = Envelope::new(
            "origin",
            1,
            Payload::LogMessage(LogMessage::new(text, MessageType::Out, 1, "app")),
        );
        Bytes::from(codec::marshal(&envelope).unwrap())
    }

    #[tokio::test]
    async fn test_workers_decode_everything_and_close_output() {
        let counters = Arc::new(Counters::new());
        let pool = UnmarshallerPool::new(3, Arc::clone(&counters));
        assert_eq!(pool.size(), 3);

        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let task = tokio::spawn(pool.run(in_rx, out_tx));

        for i in 0..10 {
            in_tx.send(log_bytes(&format!("line {i}"))).await.unwrap();
        }
        in_tx.send(Bytes::from_static(b"\xff\xfe garbage")).await.unwrap();
        drop(in_tx);

        let mut decoded = 0;
        while out_rx.recv().await.is_some() {
            decoded += 1;
        }
        task.await.unwrap();

        assert_eq!(decoded, 10);
        assert_eq!(counters.get("dropsondeUnmarshaller.logMessageReceived"), 10);
        assert_eq!(counters.get(UNMARSHAL_ERROR_COUNTER), 1);
    }

    #[test]
    fn test_zero_workers_clamped_to_one() {
        assert_eq!(UnmarshallerPool::new(0, Arc::new(Counters::new())).size(), 1);
    }
}
