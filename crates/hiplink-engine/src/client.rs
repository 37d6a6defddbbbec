use std::sync::Mutex;

use hiplink_wire::{BulkSet, Signal};

use crate::lock;

/// A logical consumer of decoded signals.
///
/// Callbacks run synchronously on the worker's dispatch path.
/// Implementations must hand off long-running work instead of blocking it.
pub trait SignalClient: Send + Sync {
    /// Borrowed delivery of a decoded signal.
    fn on_signal(&self, signal: &Signal, bulk: &BulkSet);

    /// Owned delivery of a high-volume data signal. The receiver owns the
    /// bulk buffers from here on and is responsible for releasing them.
    fn on_packet(&self, signal: Signal, bulk: BulkSet) {
        let _ = (signal, bulk);
    }

    /// Out-of-band single-byte transport notice.
    fn on_notice(&self, notice: u8) {
        let _ = notice;
    }
}

/// A correlated reply parked for a blocked requester.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub signal: Signal,
    pub bulk: BulkSet,
    pub status: u16,
}

/// Per-client reply parking space.
///
/// Allocated eagerly at registration so nothing allocates on the dispatch
/// path when the reply comes in.
#[derive(Debug, Default)]
pub struct ReplyHolder {
    parked: Mutex<Option<Reply>>,
}

impl ReplyHolder {
    /// Park a reply, replacing any unconsumed one.
    pub fn store(&self, reply: Reply) {
        *lock(&self.parked) = Some(reply);
    }

    /// Take the parked reply, if any.
    pub fn take(&self) -> Option<Reply> {
        lock(&self.parked).take()
    }
}
