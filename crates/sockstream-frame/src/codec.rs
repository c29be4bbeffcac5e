use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Length prefix: one `i32` in host byte order.
pub const LENGTH_PREFIX_SIZE: usize = std::mem::size_of::<i32>();

/// Largest payload the length prefix can describe.
pub const MAX_PAYLOAD: usize = i32::MAX as usize;

/// Encode a payload length as a length prefix.
///
/// Fails with [`FrameError::PayloadTooLarge`] above [`MAX_PAYLOAD`], before
/// anything reaches the wire.
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    i32::try_from(len)
        .map(i32::to_ne_bytes)
        .map_err(|_| FrameError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD,
        })
}

/// Decode a length prefix. Negative lengths are rejected.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    let declared = i32::from_ne_bytes(prefix);
    usize::try_from(declared).map_err(|_| FrameError::InvalidLength(declared))
}

/// Append one complete frame to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬──────────────────┐
/// │ Length (4B, native)  │ Payload          │
/// │ signed, >= 0         │ (Length bytes)   │
/// └──────────────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let prefix = encode_length(payload.len())?;
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(&prefix);
    dst.put_slice(payload);
    Ok(())
}

/// Take one complete frame off the front of `src`.
///
/// Returns `Ok(None)` if `src` does not hold a complete frame yet.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Bytes>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let len = decode_length(prefix)?;

    if src.len() < LENGTH_PREFIX_SIZE + len {
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(src.split_to(len).freeze()))
}
