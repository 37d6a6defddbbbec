use std::time::Duration;

/// Errors surfaced by the signal engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The client table is full.
    #[error("client table full ({max} clients)")]
    RegistryFull { max: usize },

    /// The handle's slot was freed or reused since registration.
    #[error("stale client handle")]
    StaleHandle,

    /// No correlated reply arrived within the caller's wait.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The wait was cancelled by session shutdown.
    #[error("request cancelled")]
    Cancelled,

    /// The managed link is down.
    #[error("managed link is down")]
    LinkDown,

    /// Port policy is blocking transmit traffic; the caller should retry
    /// from its own queue later.
    #[error("port suspended, retry later")]
    PortSuspended,

    /// Wire codec error.
    #[error(transparent)]
    Wire(#[from] hiplink_wire::WireError),

    /// Transport boundary error.
    #[error(transparent)]
    Bus(#[from] hiplink_bus::BusError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
