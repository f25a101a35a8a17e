//! Length-prefixed frames for persistent stream transports
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)][N bytes: payload]
//! ```
//!
//! Payloads on the stream transport are unsigned; the TLS session already
//! authenticates the peer.

use crate::{CodecError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for a single frame read off the wire
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Little-endian length prefix for a payload of `len` bytes
pub fn length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len = u32::try_from(len).map_err(|_| CodecError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    Ok(len.to_le_bytes())
}

/// Build a complete frame (prefix + payload) in one buffer
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let prefix = length_prefix(payload.len())?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_slice(&prefix);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split one frame off the front of `buf`
///
/// Returns the payload and the number of bytes consumed, or `None` when
/// `buf` does not yet hold a complete frame.
pub fn decode_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    let len = u32::from_le_bytes(prefix) as usize;
    let end = LENGTH_PREFIX_SIZE.checked_add(len)?;
    let payload = buf.get(LENGTH_PREFIX_SIZE..end)?;
    Some((payload, end))
}

/// Write one frame to a stream and flush it
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from a stream
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame starts.
/// A stream that ends in the middle of a frame is an I/O error.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
