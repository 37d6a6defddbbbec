//! Fan-out of decoded inbound signals to logical clients.
//!
//! Delivery order for one signal: the raw-logging sink first (borrowed
//! view of everything), then the routing-0 broadcast to the management and
//! monitor clients, then the specific slot the routing bits address. The
//! two high-volume packet kinds never join the broadcast, and their bulk
//! buffers are handed to the addressed consumer instead of being freed
//! here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hiplink_wire::{self as wire, BulkSet, Decoded, Signal, SignalKind, WireError};
use tracing::{debug, warn};

use crate::lock;
use crate::portgate::{BufferedPacket, PortGate, RxVerdict, TrafficClass};
use crate::registry::{ClientHandle, ClientRegistry};

/// Runtime role assignments for dispatch fan-out.
///
/// Roles are uniform client capabilities selected per configuration: a
/// management-only session simply leaves the others unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchRoles {
    /// Receives routing-0 broadcasts, control notices, and fault reports.
    pub management: Option<usize>,
    /// Optional second observer of routing-0 broadcasts.
    pub monitor: Option<usize>,
    /// Raw-logging sink; observes every decoded signal exactly once.
    pub sink: Option<usize>,
}

#[derive(Debug, Default)]
struct Counters {
    malformed: AtomicU64,
    unknown: AtomicU64,
    unroutable: AtomicU64,
    notices: AtomicU64,
}

/// Snapshot of dispatcher drop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub malformed: u64,
    pub unknown: u64,
    pub unroutable: u64,
    pub notices: u64,
}

/// Routes decoded inbound signals to the correct clients.
pub struct SignalDispatcher {
    registry: Arc<ClientRegistry>,
    ports: Arc<PortGate>,
    roles: Mutex<DispatchRoles>,
    counters: Counters,
}

impl SignalDispatcher {
    pub fn new(registry: Arc<ClientRegistry>, ports: Arc<PortGate>) -> Self {
        Self {
            registry,
            ports,
            roles: Mutex::new(DispatchRoles::default()),
            counters: Counters::default(),
        }
    }

    /// Assign the management role.
    pub fn set_management(&self, handle: &ClientHandle) {
        lock(&self.roles).management = Some(handle.slot());
    }

    /// Assign or clear the monitor role.
    pub fn set_monitor(&self, handle: Option<&ClientHandle>) {
        lock(&self.roles).monitor = handle.map(ClientHandle::slot);
    }

    /// Assign or clear the raw-logging sink role.
    pub fn set_logging_sink(&self, handle: Option<&ClientHandle>) {
        lock(&self.roles).sink = handle.map(ClientHandle::slot);
    }

    /// Current role assignments.
    pub fn roles(&self) -> DispatchRoles {
        *lock(&self.roles)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            unroutable: self.counters.unroutable.load(Ordering::Relaxed),
            notices: self.counters.notices.load(Ordering::Relaxed),
        }
    }

    /// Decode one inbound buffer and route it.
    ///
    /// Malformed and unknown signals are counted, logged, and dropped with
    /// their bulk, never fatal.
    pub fn dispatch(&self, frame: &[u8], bulk: BulkSet) {
        match wire::decode(frame) {
            Ok(Decoded::Notice(notice)) => self.dispatch_notice(notice),
            Ok(Decoded::Signal(signal)) => self.dispatch_signal(signal, bulk),
            Err(WireError::UnknownSignal { id }) => {
                self.counters.unknown.fetch_add(1, Ordering::Relaxed);
                warn!(id = %format_args!("{id:#06x}"), "dropping unknown signal");
            }
            Err(error) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(%error, "dropping malformed signal");
            }
        }
    }

    /// Route one already-decoded signal.
    pub fn dispatch_signal(&self, signal: Signal, bulk: BulkSet) {
        let roles = self.roles();

        // The raw-logging sink observes everything as a borrowed view.
        if let Some(sink) = roles.sink.and_then(|slot| self.registry.callback(slot)) {
            sink.on_signal(&signal, &bulk);
        }

        if signal.kind.transfers_bulk() {
            self.route_packet(signal, bulk);
            return;
        }

        if signal.routing == 0 {
            self.deliver_view(roles.management, roles.sink, &signal, &bulk);
            if roles.monitor != roles.management {
                self.deliver_view(roles.monitor, roles.sink, &signal, &bulk);
            }
        }

        if let Some(slot) = wire::slot_for_routing(signal.routing) {
            if Some(slot) == roles.sink {
                return;
            }
            match self.registry.callback(slot) {
                Some(callback) => callback.on_signal(&signal, &bulk),
                None => {
                    self.counters.unroutable.fetch_add(1, Ordering::Relaxed);
                    debug!(slot, kind = %signal.kind, "dropping signal for unregistered client");
                }
            }
        }
        // Dropping `bulk` here frees the buffers for every non-transfer kind.
    }

    fn dispatch_notice(&self, notice: u8) {
        self.counters.notices.fetch_add(1, Ordering::Relaxed);
        let management = self
            .roles()
            .management
            .and_then(|slot| self.registry.callback(slot));
        match management {
            Some(callback) => callback.on_notice(notice),
            None => debug!(notice, "control notice with no management client"),
        }
    }

    fn deliver_view(
        &self,
        slot: Option<usize>,
        sink: Option<usize>,
        signal: &Signal,
        bulk: &BulkSet,
    ) {
        let Some(slot) = slot else { return };
        // The sink already observed this signal; skipping it here keeps
        // delivery exactly-once per client.
        if Some(slot) == sink {
            return;
        }
        if let Some(callback) = self.registry.callback(slot) {
            callback.on_signal(signal, bulk);
        }
    }

    fn route_packet(&self, signal: Signal, bulk: BulkSet) {
        if signal.kind == SignalKind::PacketInd {
            let class = bulk
                .first()
                .map(|frame| TrafficClass::classify(frame.as_ref()))
                .unwrap_or(TrafficClass::Controlled);
            let source = signal.peer_address().unwrap_or_default();
            match self.ports.inbound(class, source) {
                RxVerdict::Deliver => self.deliver_packet(signal, bulk),
                RxVerdict::Defer => self.ports.defer(
                    class,
                    BufferedPacket {
                        source,
                        signal,
                        bulk,
                    },
                ),
                RxVerdict::Discard => {
                    debug!(%source, ?class, "port policy discarded inbound packet");
                }
            }
        } else {
            self.deliver_packet(signal, bulk);
        }
    }

    /// Hand a high-volume signal to its addressed consumer, transferring
    /// bulk ownership.
    ///
    /// Port reopen replay calls this directly so replayed packets are not
    /// re-gated.
    pub fn deliver_packet(&self, signal: Signal, bulk: BulkSet) {
        let roles = self.roles();
        let Some(slot) = wire::slot_for_routing(signal.routing) else {
            self.counters.unroutable.fetch_add(1, Ordering::Relaxed);
            debug!(routing = signal.routing, kind = %signal.kind, "packet with no addressable client");
            return;
        };
        if Some(slot) == roles.sink {
            return;
        }
        match self.registry.callback(slot) {
            Some(callback) => callback.on_packet(signal, bulk),
            None => {
                self.counters.unroutable.fetch_add(1, Ordering::Relaxed);
                debug!(slot, "dropping packet for unregistered client");
            }
        }
    }
}
