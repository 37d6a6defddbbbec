use std::time::Duration;

use crate::error::{BusError, Result};

/// The downward transport collaborator.
///
/// Exactly one thread, the hardware worker, calls into an implementation.
/// No other context may touch the physical transport; everything else
/// communicates through [`crate::TxQueue`] and
/// [`crate::HardwareWorker::request_run`].
pub trait BusDriver: Send {
    /// Perform one unit of hardware work.
    ///
    /// Returns the suggested wait before the next unprompted service pass
    /// (used to drive periodic low-level polling absent new wakes), or
    /// `None` to wait for an explicit wake.
    fn service(&mut self) -> Result<Option<Duration>>;

    /// Enable or disable the device interrupt source.
    fn set_interrupts(&mut self, enabled: bool) -> Result<()> {
        let _ = enabled;
        Ok(())
    }

    /// Capture device diagnostic state.
    ///
    /// Called on the worker thread after a fault is cleared or an explicit
    /// diagnostic request, before the next service pass.
    fn capture_diagnostic(&mut self) {}
}

/// Observer for transport faults raised by the worker.
///
/// The engine installs link-down marking, pending-request cancellation, and
/// the management fault broadcast through this seam.
pub trait FaultObserver: Send + Sync {
    fn on_transport_fault(&self, error: &BusError);
}
