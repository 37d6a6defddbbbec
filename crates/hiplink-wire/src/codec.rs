//! Encode/decode for the fixed HIP signal envelope.
//!
//! Wire format:
//! ```text
//! ┌───────────┬────────────┬───────────┬─────────────────┬──────────────┐
//! │ SignalId  │ RoutingId  │ SenderId  │ N × DataRef      │ Body         │
//! │ (2B LE)   │ (2B LE)    │ (2B LE)   │ (4B each, LE)    │ (fixed size) │
//! └───────────┴────────────┴───────────┴─────────────────┴──────────────┘
//! ```
//! The data-reference count and body size are fixed per signal id; the
//! envelope is not self-describing. All multi-byte fields are written
//! explicitly little-endian, never through native struct layout, so the
//! codec behaves identically on big- and little-endian hosts.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::signal::{DataRef, Signal, SignalKind};

/// Signal header: id (2) + routing (2) + sender (2) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Encoded size of one data-reference descriptor: slot (2) + length (2).
pub const DATA_REF_SIZE: usize = 4;

/// Result of decoding one inbound buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Single-byte out-of-band transport notice. Not a protocol error.
    Notice(u8),
    /// A complete protocol signal.
    Signal(Signal),
}

/// Total encoded length of a signal of `kind`.
pub fn packed_size_of(kind: SignalKind) -> usize {
    HEADER_SIZE + kind.data_ref_count() * DATA_REF_SIZE + kind.body_len()
}

/// Read the leading signal id and return the total encoded length, so a
/// stream reader knows how much to consume before the next signal.
pub fn packed_size(frame: &[u8]) -> Result<usize> {
    if frame.len() == 1 {
        return Ok(1);
    }
    if frame.len() < 2 {
        return Err(WireError::Truncated(frame.len()));
    }
    let id = u16::from_le_bytes([frame[0], frame[1]]);
    let kind = SignalKind::from_id(id).ok_or(WireError::UnknownSignal { id })?;
    Ok(packed_size_of(kind))
}

/// Decode one inbound buffer.
///
/// Validates the buffer length against the signal table before reading the
/// references or body; a buffer shorter than its id requires is
/// [`WireError::Malformed`] and no byte past the buffer is ever read.
/// Trailing bytes beyond the packed size are tolerated; stream readers
/// hand over whatever they have buffered.
pub fn decode(frame: &[u8]) -> Result<Decoded> {
    if frame.len() == 1 {
        return Ok(Decoded::Notice(frame[0]));
    }
    if frame.len() < HEADER_SIZE {
        return Err(WireError::Truncated(frame.len()));
    }

    let id = u16::from_le_bytes([frame[0], frame[1]]);
    let kind = SignalKind::from_id(id).ok_or(WireError::UnknownSignal { id })?;
    let need = packed_size_of(kind);
    if frame.len() < need {
        return Err(WireError::Malformed {
            id,
            len: frame.len(),
            need,
        });
    }

    let routing = u16::from_le_bytes([frame[2], frame[3]]);
    let sender = u16::from_le_bytes([frame[4], frame[5]]);

    let mut refs = Vec::with_capacity(kind.data_ref_count());
    let mut at = HEADER_SIZE;
    for _ in 0..kind.data_ref_count() {
        refs.push(DataRef {
            slot: u16::from_le_bytes([frame[at], frame[at + 1]]),
            length: u16::from_le_bytes([frame[at + 2], frame[at + 3]]),
        });
        at += DATA_REF_SIZE;
    }

    let body = Bytes::copy_from_slice(&frame[at..at + kind.body_len()]);

    Ok(Decoded::Signal(Signal {
        kind,
        routing,
        sender,
        refs,
        body,
    }))
}

/// Encode a signal into `dst`.
///
/// The reference count and body length are validated against the signal
/// table so every encoded buffer decodes back to the same envelope.
pub fn encode(signal: &Signal, dst: &mut BytesMut) -> Result<()> {
    let kind = signal.kind;
    if signal.refs.len() != kind.data_ref_count() {
        return Err(WireError::ReferenceCount {
            kind,
            expected: kind.data_ref_count(),
            actual: signal.refs.len(),
        });
    }
    if signal.body.len() != kind.body_len() {
        return Err(WireError::BodyLength {
            kind,
            expected: kind.body_len(),
            actual: signal.body.len(),
        });
    }

    dst.reserve(packed_size_of(kind));
    dst.put_u16_le(kind.id());
    dst.put_u16_le(signal.routing);
    dst.put_u16_le(signal.sender);
    for data_ref in &signal.refs {
        dst.put_u16_le(data_ref.slot);
        dst.put_u16_le(data_ref.length);
    }
    dst.put_slice(&signal.body);
    Ok(())
}

/// Encode a signal into a fresh buffer.
pub fn encode_to_bytes(signal: &Signal) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(packed_size_of(signal.kind));
    encode(signal, &mut buf)?;
    Ok(buf.freeze())
}

/// Absolute byte offset of the priority field, for kinds that carry one.
pub fn priority_offset(kind: SignalKind) -> Option<usize> {
    if kind.carries_priority() {
        Some(HEADER_SIZE + kind.data_ref_count() * DATA_REF_SIZE + 2)
    } else {
        None
    }
}
