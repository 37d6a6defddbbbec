use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::lock;

/// One encoded signal waiting for the transport, with its bulk payloads in
/// slot order.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub frame: Bytes,
    pub bulk: Vec<Bytes>,
}

/// Lock-protected transmit FIFO shared between senders and the worker.
///
/// Senders push under the session's transmit lock; only the worker's driver
/// pops. The lock here guards queue mutation only, never transport I/O.
#[derive(Debug, Clone, Default)]
pub struct TxQueue {
    inner: Arc<Mutex<VecDeque<OutboundFrame>>>,
}

impl TxQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: OutboundFrame) {
        lock(&self.inner).push_back(frame);
    }

    pub fn pop(&self) -> Option<OutboundFrame> {
        lock(&self.inner).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    /// Drop everything queued. Returns how many frames were flushed.
    pub fn clear(&self) -> usize {
        let mut queue = lock(&self.inner);
        let flushed = queue.len();
        queue.clear();
        flushed
    }
}
