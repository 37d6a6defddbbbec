//! Little-endian signal envelope codec for the host interface protocol (HIP).
//!
//! A HIP "signal" is the unit of exchange between host driver logic and
//! device firmware: a fixed 6-byte header (signal id, routing id, sender id,
//! all little-endian), a per-id fixed count of 4-byte data references, and a
//! per-id fixed-size body. Large or variable payloads never live inline;
//! they travel as separately-owned bulk buffers described by the data
//! references.
//!
//! This crate is the sole boundary between numeric wire ids and the typed
//! [`SignalKind`] the rest of the stack works with.

pub mod bulk;
pub mod codec;
pub mod error;
pub mod signal;

pub use bulk::{BulkSet, MAX_DATA_REFS};
pub use codec::{
    decode, encode, encode_to_bytes, packed_size, packed_size_of, priority_offset, Decoded,
    DATA_REF_SIZE, HEADER_SIZE,
};
pub use error::{Result, WireError};
pub use signal::{
    mgt_body, packet_body, sender_id_for_slot, slot_for_routing, DataRef, PeerAddress, Signal,
    SignalKind, SENDER_ID_BASE, SENDER_ID_SHIFT,
};
