use crate::signal::SignalKind;

/// Errors that can occur while encoding or decoding HIP signals.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The buffer is too short to contain a signal header.
    #[error("buffer too short for signal header ({0} bytes)")]
    Truncated(usize),

    /// The leading signal id is not in the signal table.
    #[error("unknown signal id 0x{id:04x}")]
    UnknownSignal { id: u16 },

    /// The buffer is shorter than the length its signal id requires.
    #[error("malformed signal 0x{id:04x} ({len} bytes, need {need})")]
    Malformed { id: u16, len: usize, need: usize },

    /// The signal carries the wrong number of data references for its id.
    #[error("{kind} carries {actual} data references, expected {expected}")]
    ReferenceCount {
        kind: SignalKind,
        expected: usize,
        actual: usize,
    },

    /// The signal body does not match the fixed size for its id.
    #[error("{kind} body is {actual} bytes, expected {expected}")]
    BodyLength {
        kind: SignalKind,
        expected: usize,
        actual: usize,
    },

    /// A bulk-data slot index outside the supported range.
    #[error("bulk slot {slot} out of range")]
    SlotOutOfRange { slot: usize },
}

pub type Result<T> = std::result::Result<T, WireError>;
