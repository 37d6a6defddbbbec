/// Errors raised at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The transport reported a fault; the worker blocks until the fault
    /// is explicitly cleared.
    #[error("transport fault: {0}")]
    Fault(String),

    /// An I/O error from the underlying bus.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device is gone. Terminal: the worker loop exits on its own.
    #[error("device removed")]
    DeviceRemoved,
}

impl BusError {
    /// Terminal errors end the worker instead of blocking it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DeviceRemoved)
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
