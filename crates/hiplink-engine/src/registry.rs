//! Bounded table of logical clients.
//!
//! Slots hand out generation-checked handles instead of raw pointers, so a
//! handle that outlives its registration is inert rather than dangerous.
//! Callbacks and reply storage are `Arc`s: deregistration clears the slot,
//! and a dispatch that already resolved its clone finishes safely.

use std::sync::{Arc, Mutex};

use hiplink_wire::sender_id_for_slot;

use crate::client::{ReplyHolder, SignalClient};
use crate::error::{EngineError, Result};
use crate::lock;

/// Maximum number of concurrently registered clients.
pub const MAX_CLIENTS: usize = 8;

/// Stable handle to a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandle {
    slot: usize,
    generation: u32,
    sender_id: u16,
}

impl ClientHandle {
    /// The table slot this handle addresses.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The sender id stamped into signals this client originates.
    pub fn sender_id(&self) -> u16 {
        self.sender_id
    }
}

struct Registered {
    generation: u32,
    callback: Arc<dyn SignalClient>,
    holder: Arc<ReplyHolder>,
}

struct RegistryState {
    slots: [Option<Registered>; MAX_CLIENTS],
    generations: [u32; MAX_CLIENTS],
}

/// Fixed-capacity client table.
pub struct ClientRegistry {
    state: Mutex<RegistryState>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                slots: std::array::from_fn(|_| None),
                generations: [0; MAX_CLIENTS],
            }),
        }
    }

    /// Register a client callback.
    ///
    /// Scans for a free slot and eagerly allocates that slot's
    /// reply-holding storage. `RegistryFull` is the only failure and leaves
    /// no partial state behind.
    pub fn register(&self, callback: Arc<dyn SignalClient>) -> Result<ClientHandle> {
        let mut state = lock(&self.state);
        let slot = state
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(EngineError::RegistryFull { max: MAX_CLIENTS })?;

        state.generations[slot] = state.generations[slot].wrapping_add(1);
        let generation = state.generations[slot];
        state.slots[slot] = Some(Registered {
            generation,
            callback,
            holder: Arc::new(ReplyHolder::default()),
        });

        Ok(ClientHandle {
            slot,
            generation,
            sender_id: sender_id_for_slot(slot),
        })
    }

    /// Deregister a client.
    ///
    /// Clears the slot so an in-flight dispatch resolves "no client" from
    /// here on; the callback and reply storage are freed on their last
    /// clone's drop. Stale handles are ignored.
    pub fn deregister(&self, handle: &ClientHandle) -> bool {
        let mut state = lock(&self.state);
        match &state.slots[handle.slot] {
            Some(registered) if registered.generation == handle.generation => {
                state.slots[handle.slot] = None;
                true
            }
            _ => false,
        }
    }

    /// The callback registered in `slot`, if any.
    pub fn callback(&self, slot: usize) -> Option<Arc<dyn SignalClient>> {
        if slot >= MAX_CLIENTS {
            return None;
        }
        lock(&self.state).slots[slot]
            .as_ref()
            .map(|registered| Arc::clone(&registered.callback))
    }

    /// The reply-holding storage behind a live handle.
    pub fn holder(&self, handle: &ClientHandle) -> Option<Arc<ReplyHolder>> {
        lock(&self.state).slots[handle.slot]
            .as_ref()
            .filter(|registered| registered.generation == handle.generation)
            .map(|registered| Arc::clone(&registered.holder))
    }

    /// True if `slot` currently holds a registered client.
    pub fn is_registered(&self, slot: usize) -> bool {
        slot < MAX_CLIENTS && lock(&self.state).slots[slot].is_some()
    }

    /// Number of registered clients.
    pub fn active_clients(&self) -> usize {
        lock(&self.state).slots.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hiplink_wire::{slot_for_routing, BulkSet, Signal};

    use super::*;

    #[derive(Default)]
    struct NullClient {
        deliveries: AtomicUsize,
    }

    impl SignalClient for NullClient {
        fn on_signal(&self, _signal: &Signal, _bulk: &BulkSet) {
            self.deliveries.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_until_full() {
        let registry = ClientRegistry::new();
        for _ in 0..MAX_CLIENTS {
            registry
                .register(Arc::new(NullClient::default()))
                .expect("table should have room");
        }
        let err = registry
            .register(Arc::new(NullClient::default()))
            .unwrap_err();
        assert!(matches!(err, EngineError::RegistryFull { max: MAX_CLIENTS }));
        assert_eq!(registry.active_clients(), MAX_CLIENTS);
    }

    #[test]
    fn sender_id_routes_back_to_the_slot() {
        let registry = ClientRegistry::new();
        let first = registry.register(Arc::new(NullClient::default())).unwrap();
        let second = registry.register(Arc::new(NullClient::default())).unwrap();

        assert_ne!(first.sender_id(), second.sender_id());
        assert_eq!(slot_for_routing(first.sender_id()), Some(first.slot()));
        assert_eq!(slot_for_routing(second.sender_id()), Some(second.slot()));
    }

    #[test]
    fn deregister_frees_the_slot() {
        let registry = ClientRegistry::new();
        let handle = registry.register(Arc::new(NullClient::default())).unwrap();

        assert!(registry.is_registered(handle.slot()));
        assert!(registry.deregister(&handle));
        assert!(!registry.is_registered(handle.slot()));
        assert!(registry.callback(handle.slot()).is_none());

        // Second deregistration with the same handle is inert.
        assert!(!registry.deregister(&handle));
    }

    #[test]
    fn stale_handle_cannot_touch_a_reused_slot() {
        let registry = ClientRegistry::new();
        let old = registry.register(Arc::new(NullClient::default())).unwrap();
        registry.deregister(&old);

        let new = registry.register(Arc::new(NullClient::default())).unwrap();
        assert_eq!(new.slot(), old.slot());

        assert!(!registry.deregister(&old));
        assert!(registry.holder(&old).is_none());
        assert!(registry.is_registered(new.slot()));
    }

    #[test]
    fn holder_is_allocated_at_registration() {
        let registry = ClientRegistry::new();
        let handle = registry.register(Arc::new(NullClient::default())).unwrap();

        let holder = registry.holder(&handle).expect("holder allocated eagerly");
        assert!(holder.take().is_none());

        registry.deregister(&handle);
        assert!(registry.holder(&handle).is_none());
    }

    #[test]
    fn dispatch_clone_survives_concurrent_deregistration() {
        let registry = Arc::new(ClientRegistry::new());
        let client = Arc::new(NullClient::default());
        let handle = registry.register(client.clone()).unwrap();

        // A dispatch path that resolved the callback before deregistration
        // completes against its own clone.
        let resolved = registry.callback(handle.slot()).unwrap();
        registry.deregister(&handle);
        resolved.on_signal(
            &Signal::new(hiplink_wire::SignalKind::MgtEventInd),
            &BulkSet::empty(),
        );

        assert_eq!(client.deliveries.load(Ordering::SeqCst), 1);
        assert!(registry.callback(handle.slot()).is_none());
    }

    #[test]
    fn out_of_range_slot_lookups_are_none() {
        let registry = ClientRegistry::new();
        assert!(registry.callback(MAX_CLIENTS).is_none());
        assert!(!registry.is_registered(MAX_CLIENTS + 7));
    }
}
