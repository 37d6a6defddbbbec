//! Separately-owned bulk payloads referenced from a signal envelope.
//!
//! Packet bodies and management blobs never live inline in the header
//! region; a signal's data references describe which of these slots carry
//! payload and how long each one is.

use bytes::Bytes;

use crate::error::{Result, WireError};

/// Maximum number of bulk buffers one signal can reference.
pub const MAX_DATA_REFS: usize = 2;

/// Up to [`MAX_DATA_REFS`] separately-owned payloads, indexed by slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSet {
    slots: [Option<Bytes>; MAX_DATA_REFS],
}

impl BulkSet {
    /// A set with no payloads.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A set carrying one payload in slot 0.
    pub fn single(payload: Bytes) -> Self {
        let mut set = Self::default();
        set.slots[0] = Some(payload);
        set
    }

    /// Place a payload in `slot`, replacing any existing one.
    pub fn insert(&mut self, slot: usize, payload: Bytes) -> Result<()> {
        if slot >= MAX_DATA_REFS {
            return Err(WireError::SlotOutOfRange { slot });
        }
        self.slots[slot] = Some(payload);
        Ok(())
    }

    /// Borrow the payload in `slot`.
    pub fn get(&self, slot: usize) -> Option<&Bytes> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Remove and return the payload in `slot`.
    pub fn take(&mut self, slot: usize) -> Option<Bytes> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Borrow the slot-0 payload.
    pub fn first(&self) -> Option<&Bytes> {
        self.get(0)
    }

    /// True if no slot carries a payload.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Total payload bytes across all slots.
    pub fn total_len(&self) -> usize {
        self.slots.iter().flatten().map(Bytes::len).sum()
    }

    /// Consume the set, yielding the non-empty payloads in slot order.
    pub fn into_payloads(self) -> Vec<Bytes> {
        self.slots.into_iter().flatten().collect()
    }
}
