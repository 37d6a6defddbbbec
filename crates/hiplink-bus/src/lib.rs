//! Serialized hardware access for the HIP stack.
//!
//! One background thread, the [`HardwareWorker`], performs every transport
//! transaction through a caller-supplied [`BusDriver`]. Concurrent producers
//! hand it work via the [`TxQueue`] and wake it with
//! [`HardwareWorker::request_run`]; nothing else touches the bus.
//!
//! This is the lowest layer of hiplink. The engine crate builds dispatch,
//! request/reply, and port gating on top of it.

pub mod driver;
pub mod error;
pub mod link;
pub mod queue;
pub mod worker;

pub use driver::{BusDriver, FaultObserver};
pub use error::{BusError, Result};
pub use link::LinkState;
pub use queue::{OutboundFrame, TxQueue};
pub use worker::{HardwareWorker, RunRequest, WorkerPhase};

/// Lock a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
