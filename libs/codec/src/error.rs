//! Codec errors for envelope marshalling and frame handling

use thiserror::Error;
use types::EnvelopeError;

/// Errors produced while turning envelopes into wire bytes and back
#[derive(Debug, Error)]
pub enum CodecError {
    /// Envelope could not be serialized
    #[error("Marshal failed: {0}")]
    Marshal(String),

    /// Bytes did not decode into an envelope
    #[error("Unmarshal failed: {0}")]
    Unmarshal(String),

    /// Decoded envelope violated a structural invariant
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    /// Signed message shorter than the signature itself
    #[error("Signed message too short: need at least {need} bytes, got {got}")]
    SignatureTooShort { need: usize, got: usize },

    /// Signature did not match the payload under the shared secret
    #[error("Signature mismatch")]
    SignatureMismatch,

    /// Frame length prefix exceeds the configured maximum
    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Underlying stream failed while reading or writing a frame
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether this error means the peer is not trusted (as opposed to a
    /// malformed or truncated message)
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            CodecError::SignatureTooShort { .. } | CodecError::SignatureMismatch
        )
    }

    /// Whether the stream this error came from should be abandoned
    pub fn is_stream_fatal(&self) -> bool {
        matches!(self, CodecError::Io(_) | CodecError::FrameTooLarge { .. })
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
