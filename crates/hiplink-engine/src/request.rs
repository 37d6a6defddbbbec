//! The synchronous request/reply channel.
//!
//! At most one request is in flight per session. "Only one in flight" is an
//! exclusion gate held for the whole request+wait window; "how long to
//! wait" is a per-call timeout, because operations vary widely in expected
//! latency. The gate is the only synchronization point held across a
//! blocking wait; every other lock in the engine is mutation-scoped.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hiplink_wire::{BulkSet, Signal};
use tracing::debug;

use crate::client::{Reply, ReplyHolder};
use crate::error::{EngineError, Result};
use crate::lock;

/// Status recorded when a transport fault fails the pending request.
pub const STATUS_LINK_FAULT: u16 = 0xFFFF;

/// State of the single request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Pending,
    Received,
    TimedOut,
}

#[derive(Debug)]
struct Gate {
    held: bool,
    shutdown: bool,
}

#[derive(Debug)]
struct Pending {
    state: RequestState,
    holder: Option<Arc<ReplyHolder>>,
    status: u16,
    shutdown: bool,
}

/// One-at-a-time blocking request/reply over the dispatch path.
#[derive(Debug)]
pub struct RequestChannel {
    gate: Mutex<Gate>,
    gate_wake: Condvar,
    pending: Mutex<Pending>,
    pending_wake: Condvar,
}

impl Default for RequestChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestChannel {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(Gate {
                held: false,
                shutdown: false,
            }),
            gate_wake: Condvar::new(),
            pending: Mutex::new(Pending {
                state: RequestState::Idle,
                holder: None,
                status: 0,
                shutdown: false,
            }),
            pending_wake: Condvar::new(),
        }
    }

    /// Acquire the exclusion gate and mark a request pending.
    ///
    /// Blocks while another request is in flight. A shutdown during the
    /// wait fails cleanly with `Cancelled` and no side effects. The caller
    /// then submits its signal through the normal transmit path and calls
    /// [`RequestTicket::wait`].
    pub fn begin(&self, holder: Arc<ReplyHolder>) -> Result<RequestTicket<'_>> {
        let mut gate = lock(&self.gate);
        loop {
            if gate.shutdown {
                return Err(EngineError::Cancelled);
            }
            if !gate.held {
                break;
            }
            gate = self
                .gate_wake
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
        gate.held = true;
        drop(gate);

        let mut pending = lock(&self.pending);
        pending.state = RequestState::Pending;
        pending.holder = Some(holder);
        pending.status = 0;
        drop(pending);

        Ok(RequestTicket {
            channel: self,
            consumed: false,
        })
    }

    /// Complete the pending request with a correlated reply.
    ///
    /// Called from a dispatch callback. No-op unless a request is pending,
    /// so a reply arriving after the timeout already fired changes nothing.
    pub fn complete(&self, signal: Signal, bulk: BulkSet, status: u16) -> bool {
        let mut pending = lock(&self.pending);
        if pending.state != RequestState::Pending {
            debug!(kind = %signal.kind, "ignoring uncorrelated reply");
            return false;
        }
        if let Some(holder) = &pending.holder {
            holder.store(Reply {
                signal,
                bulk,
                status,
            });
        }
        pending.status = status;
        pending.state = RequestState::Received;
        self.pending_wake.notify_all();
        true
    }

    /// Complete the pending request using the status word carried in the
    /// reply body.
    pub fn complete_reply(&self, signal: Signal, bulk: BulkSet) -> bool {
        let status = signal.status().unwrap_or(0);
        self.complete(signal, bulk, status)
    }

    /// Fail the pending request without a reply payload (transport fault).
    pub fn fail_pending(&self, status: u16) -> bool {
        let mut pending = lock(&self.pending);
        if pending.state != RequestState::Pending {
            return false;
        }
        pending.holder = None;
        pending.status = status;
        pending.state = RequestState::Received;
        self.pending_wake.notify_all();
        true
    }

    /// Cancel the current wait and every future `begin`.
    pub fn shutdown(&self) {
        {
            let mut gate = lock(&self.gate);
            gate.shutdown = true;
            self.gate_wake.notify_all();
        }
        {
            let mut pending = lock(&self.pending);
            pending.shutdown = true;
            self.pending_wake.notify_all();
        }
    }

    /// Current request state.
    pub fn state(&self) -> RequestState {
        lock(&self.pending).state
    }

    fn release_gate(&self) {
        let mut gate = lock(&self.gate);
        gate.held = false;
        self.gate_wake.notify_one();
    }
}

/// Exclusive access to the in-flight request slot.
///
/// Dropping an unconsumed ticket abandons the request and releases the
/// gate, so a caller unwinding early cannot wedge the channel.
#[derive(Debug)]
pub struct RequestTicket<'a> {
    channel: &'a RequestChannel,
    consumed: bool,
}

impl RequestTicket<'_> {
    /// Block until the reply arrives or `timeout` elapses.
    ///
    /// On success, returns the recorded status and the reply drained from
    /// the holding storage; the drain happens before the gate is released,
    /// so the next request cannot disturb it. A genuine timeout marks the
    /// slot `TimedOut` (a late reply is then a safe no-op), releases the
    /// gate exactly once, and reports `Timeout`; a shutdown releases the
    /// gate and reports `Cancelled`.
    pub fn wait(self, timeout: Duration) -> Result<(u16, Option<Reply>)> {
        let deadline = Instant::now() + timeout;
        let mut pending = lock(&self.channel.pending);
        loop {
            if pending.shutdown {
                return self.finish(pending, RequestState::Idle, Err(EngineError::Cancelled));
            }
            if pending.state == RequestState::Received {
                let status = pending.status;
                let reply = pending.holder.take().and_then(|holder| holder.take());
                return self.finish(pending, RequestState::Idle, Ok((status, reply)));
            }
            let now = Instant::now();
            if now >= deadline {
                return self.finish(
                    pending,
                    RequestState::TimedOut,
                    Err(EngineError::Timeout(timeout)),
                );
            }
            let (guard, _) = self
                .channel
                .pending_wake
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
        }
    }

    fn finish<T>(
        mut self,
        mut pending: MutexGuard<'_, Pending>,
        state: RequestState,
        result: Result<T>,
    ) -> Result<T> {
        pending.state = state;
        pending.holder = None;
        drop(pending);
        self.consumed = true;
        self.channel.release_gate();
        result
    }
}

impl Drop for RequestTicket<'_> {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        {
            let mut pending = lock(&self.channel.pending);
            pending.state = RequestState::Idle;
            pending.holder = None;
        }
        self.channel.release_gate();
    }
}
