//! Envelope marshalling
//!
//! Envelopes travel as bincode-encoded serde structures. Decoding also runs
//! [`Envelope::validate`] so that nothing downstream ever sees an envelope
//! whose declared event type disagrees with its payload.

use crate::{CodecError, Result};
use types::Envelope;

/// Serialize an envelope to its wire payload
pub fn marshal(envelope: &Envelope) -> Result<Vec<u8>> {
    bincode::serialize(envelope).map_err(|e| CodecError::Marshal(e.to_string()))
}

/// Decode and validate an envelope from its wire payload
pub fn unmarshal(bytes: &[u8]) -> Result<Envelope> {
    let envelope: Envelope =
        bincode::deserialize(bytes).map_err(|e| CodecError::Unmarshal(e.to_string()))?;
    envelope.validate()?;
    Ok(envelope)
}
