//! Signature verification stage
//!
//! Every inbound datagram is checked against the shared secret before it is
//! decoded. Rejected datagrams are counted and dropped.

use crate::metrics::Counters;
use bytes::Bytes;
use codec::{Signer, SIGNATURE_LENGTH};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const INVALID_SIGNATURE_COUNTER: &str = "signatureVerifier.invalidSignatureErrors";
pub const VALID_SIGNATURE_COUNTER: &str = "signatureVerifier.validSignatures";

pub struct SignatureVerifier {
    signer: Signer,
    counters: Arc<Counters>,
}

impl SignatureVerifier {
    pub fn new(signer: Signer, counters: Arc<Counters>) -> Self {
        Self { signer, counters }
    }

    /// Verify one datagram, returning the payload without its signature
    pub fn verify(&self, signed: Bytes) -> Option<Bytes> {
        match self.signer.verify(&signed) {
            Ok(_) => {
                self.counters.increment(VALID_SIGNATURE_COUNTER);
                Some(signed.slice(SIGNATURE_LENGTH..))
            }
            Err(e) => {
                self.counters.increment(INVALID_SIGNATURE_COUNTER);
                debug!(error = %e, bytes = signed.len(), "Dropping datagram with invalid signature");
                None
            }
        }
    }

    /// Run until the input closes; dropping `output` on return closes the
    /// next stage's input
    pub async fn run(self, mut input: mpsc::Receiver<Bytes>, output: mpsc::Sender<Bytes>) {
        while let Some(signed) = input.recv().await {
            if let Some(payload) = self.verify(signed) {
                if output.send(payload).await.is_err() {
                    break;
                }
            }
        }
        info!("Signature verifier stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_passes_invalid_dropped() {
        let counters = Arc::new(Counters::new());
        let signer = Signer::new("secret");
        let verifier = SignatureVerifier::new(signer.clone(), Arc::clone(&counters));

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let task = tokio::spawn(verifier.run(in_rx, out_tx));

        in_tx.send(Bytes::from(signer.sign(b"good"))).await.unwrap();
        in_tx
            .send(Bytes::from(Signer::new("other").sign(b"forged")))
            .await
            .unwrap();
        in_tx.send(Bytes::from_static(b"short")).await.unwrap();
        drop(in_tx);

        assert_eq!(out_rx.recv().await.unwrap(), Bytes::from_static(b"good"));
        assert!(out_rx.recv().await.is_none());
        task.await.unwrap();

        assert_eq!(counters.get(VALID_SIGNATURE_COUNTER), 1);
        assert_eq!(counters.get(INVALID_SIGNATURE_COUNTER), 2);
    }
}
