//! Message signing with a shared secret
//!
//! Signed datagrams carry a 32-byte HMAC-SHA256 digest of the payload in
//! front of the payload itself:
//!
//! ```text
//! [32 bytes: HMAC-SHA256(secret, payload)][N bytes: payload]
//! ```
//!
//! The layout is fixed by the emitting agents; nothing outside this module
//! should look at the digest bytes.

use crate::{CodecError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Length of the digest placed in front of every signed payload
pub const SIGNATURE_LENGTH: usize = 32;

fn keyed_mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC can take a key of any size")
}

/// Prepend a keyed digest of `message` computed with `secret`
pub fn sign(message: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = keyed_mac(secret);
    mac.update(message);
    let digest = mac.finalize().into_bytes();

    let mut signed = Vec::with_capacity(SIGNATURE_LENGTH + message.len());
    signed.extend_from_slice(&digest);
    signed.extend_from_slice(message);
    signed
}

/// Check the digest in front of `signed` and return the payload after it
pub fn verify<'a>(signed: &'a [u8], secret: &[u8]) -> Result<&'a [u8]> {
    if signed.len() < SIGNATURE_LENGTH {
        return Err(CodecError::SignatureTooShort {
            need: SIGNATURE_LENGTH,
            got: signed.len(),
        });
    }
    let (digest, payload) = signed.split_at(SIGNATURE_LENGTH);

    let mut mac = keyed_mac(secret);
    mac.update(payload);
    mac.verify_slice(digest)
        .map_err(|_| CodecError::SignatureMismatch)?;
    Ok(payload)
}

/// Shared-secret holder for components that sign or verify on every message
///
/// Cloning shares the secret; `Debug` never prints it.
#[derive(Clone)]
pub struct Signer {
    secret: Arc<[u8]>,
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        sign(message, &self.secret)
    }

    pub fn verify<'a>(&self, signed: &'a [u8]) -> Result<&'a [u8]> {
        verify(signed, &self.secret)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("secret", &"<redacted>")
            .finish()
    }
}
