//! HIP signal dispatch, blocking request/reply, and port gating.
//!
//! This is the core value-add layer of hiplink. It multiplexes one
//! serialized hardware transport across independent logical clients:
//! a bounded [`ClientRegistry`] hands out routable sender ids, the
//! [`SignalDispatcher`] fans decoded signals out by routing id, the
//! [`RequestChannel`] layers one-at-a-time blocking request/reply over the
//! asynchronous dispatch path, and the [`PortGate`] gates data traffic
//! through the controlled/uncontrolled port pair with deferred replay.
//! A [`HipSession`] owns one of everything per managed device.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod portgate;
pub mod registry;
pub mod request;
pub mod session;

pub use client::{Reply, ReplyHolder, SignalClient};
pub use dispatch::{DispatchRoles, DispatchStats, SignalDispatcher};
pub use error::{EngineError, Result};
pub use portgate::{
    BufferedPacket, GateStats, PortGate, PortPolicy, RxVerdict, TrafficClass, TxVerdict,
    ETHERTYPE_PAE,
};
pub use registry::{ClientHandle, ClientRegistry, MAX_CLIENTS};
pub use request::{RequestChannel, RequestState, RequestTicket, STATUS_LINK_FAULT};
pub use session::{
    HipSession, SessionConfig, SessionParts, TxOutcome, FAULT_CODE_DEVICE_GONE, FAULT_CODE_IO,
    FAULT_CODE_TRANSPORT,
};

/// Lock a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
