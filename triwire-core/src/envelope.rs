//! Enveloped message framing.
//!
//! Streaming bodies in all three protocols (and gRPC unary bodies) carry
//! messages in envelopes:
//!
//! ```text
//! [flags:1][length:4 big-endian][payload:length]
//! ```
//!
//! Flag bit 0 marks a compressed payload. Flag bit 1 marks an end-of-stream
//! frame (Connect streaming and gRPC-Web), whose payload carries trailers
//! instead of an application message.

use bytes::{Buf, Bytes, BytesMut};

use crate::compression::CompressionPool;
use crate::error::RpcError;

/// Envelope header size: flags byte plus length prefix.
pub const ENVELOPE_HEADER_LEN: usize = 5;

/// Flag bit 0: payload is compressed.
pub const FLAG_COMPRESSED: u8 = 0b01;

/// Flag bit 1: frame conveys end-of-stream trailers, not a message.
pub const FLAG_END_STREAM: u8 = 0b10;

pub fn is_compressed(flags: u8) -> bool {
    flags & FLAG_COMPRESSED != 0
}

pub fn is_end_stream(flags: u8) -> bool {
    flags & FLAG_END_STREAM != 0
}

/// Frame a payload into an envelope.
///
/// The payload is compressed (and flag bit 0 set) iff a pool is given and the
/// payload is at least `min_bytes` long.
pub fn pack(
    payload: &[u8],
    pool: Option<&dyn CompressionPool>,
    min_bytes: usize,
) -> Result<Bytes, RpcError> {
    let (flags, body) = match pool {
        Some(pool) if payload.len() >= min_bytes => {
            let compressed = pool
                .compress(payload)
                .map_err(|e| RpcError::Encode(format!("compression failed: {e}")))?;
            (FLAG_COMPRESSED, compressed)
        }
        _ => (0, Bytes::copy_from_slice(payload)),
    };

    let mut frame = Vec::with_capacity(ENVELOPE_HEADER_LEN + body.len());
    frame.push(flags);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(Bytes::from(frame))
}

/// Unpack a complete envelope, header byte included.
///
/// Returns the flags byte and the payload, decompressed when flag bit 0 is
/// set. A compressed payload without a pool to decompress it is a protocol
/// error, as is a length prefix that disagrees with the buffer.
pub fn unpack_with_header_byte(
    frame: &[u8],
    pool: Option<&dyn CompressionPool>,
) -> Result<(u8, Bytes), RpcError> {
    if frame.len() < ENVELOPE_HEADER_LEN {
        return Err(RpcError::Protocol(format!(
            "incomplete envelope header: expected {} bytes, got {}",
            ENVELOPE_HEADER_LEN,
            frame.len()
        )));
    }

    let flags = frame[0];
    let declared = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    let body = &frame[ENVELOPE_HEADER_LEN..];
    if body.len() != declared {
        return Err(RpcError::Protocol(format!(
            "envelope length mismatch: header says {declared}, body has {}",
            body.len()
        )));
    }

    let payload = if is_compressed(flags) {
        let Some(pool) = pool else {
            return Err(RpcError::Protocol(
                "message is compressed but no known compression pool is configured".into(),
            ));
        };
        pool.decompress(body)
            .map_err(|e| RpcError::Decode(format!("decompression failed: {e}")))?
    } else {
        Bytes::copy_from_slice(body)
    };

    Ok((flags, payload))
}

/// Split the next complete envelope off the front of `buf`.
///
/// Returns the whole frame (header byte included) or `None` when more bytes
/// are needed. Used by the receive pump to cut frames out of arbitrarily
/// chunked transport reads.
pub fn split_frame(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < ENVELOPE_HEADER_LEN {
        return None;
    }
    let declared = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let frame_len = ENVELOPE_HEADER_LEN + declared;
    if buf.len() < frame_len {
        return None;
    }
    Some(buf.copy_to_bytes(frame_len))
}
