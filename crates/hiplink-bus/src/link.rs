use std::sync::atomic::{AtomicBool, Ordering};

/// Up/down state of the managed link.
///
/// Marked down on transport faults and at teardown; higher-level policy
/// decides when to bring it back up.
#[derive(Debug, Default)]
pub struct LinkState {
    down: AtomicBool,
}

impl LinkState {
    /// A link that starts up.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_up(&self) -> bool {
        !self.down.load(Ordering::Acquire)
    }

    pub fn set_up(&self) {
        self.down.store(false, Ordering::Release);
    }

    pub fn set_down(&self) {
        self.down.store(true, Ordering::Release);
    }
}
