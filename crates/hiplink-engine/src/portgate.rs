//! Two-state access control for data traffic, with deferred replay.
//!
//! The controlled port models post-authentication packet flow; the
//! uncontrolled port carries pre-authentication traffic (802.1X PAE
//! frames). Each class holds either one global policy or a small
//! per-peer table, plus a FIFO of packets deferred while the matching
//! policy was `ClosedBlock`. The locks here cover list and table mutation
//! only; packet delivery always happens outside them.

use std::collections::VecDeque;
use std::sync::Mutex;

use hiplink_wire::{BulkSet, PeerAddress, Signal};
use tracing::debug;

use crate::lock;

/// IEEE 802.1X PAE ethertype; its frames ride the uncontrolled port.
pub const ETHERTYPE_PAE: u16 = 0x888E;

/// The two gated traffic classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    Controlled,
    Uncontrolled,
}

impl TrafficClass {
    /// Classify an ethernet frame by its ethertype.
    pub fn classify(frame: &[u8]) -> TrafficClass {
        if frame.len() >= 14 && u16::from_be_bytes([frame[12], frame[13]]) == ETHERTYPE_PAE {
            TrafficClass::Uncontrolled
        } else {
            TrafficClass::Controlled
        }
    }
}

/// Access policy for one traffic class, or one peer within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPolicy {
    Open,
    /// Closed; receive traffic is deferred for later replay, transmit
    /// traffic is pushed back to the caller.
    ClosedBlock,
    /// Closed; traffic is dropped and counted.
    ClosedDiscard,
}

/// Transmit-side verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxVerdict {
    Forward,
    /// Dropped and counted.
    Discard,
    /// Retry later from the caller's own queue; nothing is buffered here.
    Busy,
}

/// Receive-side verdict. `Defer` obliges the caller to park the packet
/// with [`PortGate::defer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxVerdict {
    Deliver,
    Defer,
    Discard,
}

/// A packet parked while its class/peer policy was `ClosedBlock`.
#[derive(Debug, Clone)]
pub struct BufferedPacket {
    pub source: PeerAddress,
    pub signal: Signal,
    pub bulk: BulkSet,
}

/// Counters for one traffic class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub tx_discarded: u64,
    pub rx_discarded: u64,
    pub deferred: u64,
    pub pending: usize,
}

#[derive(Debug, Clone, Copy)]
struct PortEntry {
    address: PeerAddress,
    policy: PortPolicy,
}

#[derive(Debug)]
enum PolicyMode {
    Global(PortPolicy),
    Table(Vec<PortEntry>),
}

struct GateState {
    mode: PolicyMode,
    pending: VecDeque<BufferedPacket>,
    tx_discarded: u64,
    rx_discarded: u64,
    deferred: u64,
}

impl GateState {
    fn new() -> Self {
        Self {
            mode: PolicyMode::Global(PortPolicy::Open),
            pending: VecDeque::new(),
            tx_discarded: 0,
            rx_discarded: 0,
            deferred: 0,
        }
    }

    fn policy_for(&self, address: PeerAddress) -> PortPolicy {
        match &self.mode {
            PolicyMode::Global(policy) => *policy,
            PolicyMode::Table(entries) => entries
                .iter()
                .find(|entry| entry.address == address)
                .map_or(PortPolicy::Open, |entry| entry.policy),
        }
    }
}

/// Per-class access policy plus the deferred-delivery buffer.
pub struct PortGate {
    controlled: Mutex<GateState>,
    uncontrolled: Mutex<GateState>,
}

impl Default for PortGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PortGate {
    /// Both classes start fully open, in single-policy mode.
    pub fn new() -> Self {
        Self {
            controlled: Mutex::new(GateState::new()),
            uncontrolled: Mutex::new(GateState::new()),
        }
    }

    fn class_state(&self, class: TrafficClass) -> &Mutex<GateState> {
        match class {
            TrafficClass::Controlled => &self.controlled,
            TrafficClass::Uncontrolled => &self.uncontrolled,
        }
    }

    /// Install a single class-wide policy, discarding any per-peer table.
    pub fn set_policy(&self, class: TrafficClass, policy: PortPolicy) {
        lock(self.class_state(class)).mode = PolicyMode::Global(policy);
    }

    /// Install or update a per-peer policy, switching the class to table
    /// mode if needed.
    pub fn set_peer_policy(&self, class: TrafficClass, address: PeerAddress, policy: PortPolicy) {
        let mut state = lock(self.class_state(class));
        match &mut state.mode {
            PolicyMode::Table(entries) => {
                if let Some(entry) = entries.iter_mut().find(|entry| entry.address == address) {
                    entry.policy = policy;
                } else {
                    entries.push(PortEntry { address, policy });
                }
            }
            PolicyMode::Global(_) => {
                state.mode = PolicyMode::Table(vec![PortEntry { address, policy }]);
            }
        }
    }

    /// Current policy for `address` within `class`.
    ///
    /// Table mode scans for a match and defaults to `Open` when nothing
    /// matches; single-policy mode ignores the address.
    pub fn lookup(&self, class: TrafficClass, address: PeerAddress) -> PortPolicy {
        lock(self.class_state(class)).policy_for(address)
    }

    /// Transmit-side consult. Never buffers: a `ClosedBlock` policy tells
    /// the caller to retry from its own output queue.
    pub fn outbound(&self, class: TrafficClass, address: PeerAddress) -> TxVerdict {
        let mut state = lock(self.class_state(class));
        match state.policy_for(address) {
            PortPolicy::Open => TxVerdict::Forward,
            PortPolicy::ClosedDiscard => {
                state.tx_discarded += 1;
                TxVerdict::Discard
            }
            PortPolicy::ClosedBlock => TxVerdict::Busy,
        }
    }

    /// Receive-side consult.
    pub fn inbound(&self, class: TrafficClass, address: PeerAddress) -> RxVerdict {
        let mut state = lock(self.class_state(class));
        match state.policy_for(address) {
            PortPolicy::Open => RxVerdict::Deliver,
            PortPolicy::ClosedDiscard => {
                state.rx_discarded += 1;
                RxVerdict::Discard
            }
            PortPolicy::ClosedBlock => RxVerdict::Defer,
        }
    }

    /// Park a packet deferred by [`PortGate::inbound`].
    pub fn defer(&self, class: TrafficClass, packet: BufferedPacket) {
        let source = packet.source;
        let mut state = lock(self.class_state(class));
        state.deferred += 1;
        state.pending.push_back(packet);
        debug!(?class, %source, "deferred inbound packet");
    }

    /// Remove every pending packet from `address` (or all of them, for
    /// `None`) in FIFO arrival order.
    ///
    /// The lock covers only the list mutation; the caller delivers or frees
    /// the returned packets outside it, so every parked packet leaves its
    /// list exactly once.
    pub fn drain(&self, class: TrafficClass, address: Option<PeerAddress>) -> Vec<BufferedPacket> {
        let mut state = lock(self.class_state(class));
        match address {
            None => state.pending.drain(..).collect(),
            Some(address) => {
                let mut kept = VecDeque::with_capacity(state.pending.len());
                let mut drained = Vec::new();
                while let Some(packet) = state.pending.pop_front() {
                    if packet.source == address {
                        drained.push(packet);
                    } else {
                        kept.push_back(packet);
                    }
                }
                state.pending = kept;
                drained
            }
        }
    }

    /// Number of packets currently parked for `class`.
    pub fn pending_len(&self, class: TrafficClass) -> usize {
        lock(self.class_state(class)).pending.len()
    }

    /// Counter snapshot for `class`.
    pub fn stats(&self, class: TrafficClass) -> GateStats {
        let state = lock(self.class_state(class));
        GateStats {
            tx_discarded: state.tx_discarded,
            rx_discarded: state.rx_discarded,
            deferred: state.deferred,
            pending: state.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(tag: u8) -> PeerAddress {
        PeerAddress([tag, 0, 0, 0, 0, tag])
    }

    fn packet(tag: u8, source: PeerAddress) -> BufferedPacket {
        BufferedPacket {
            source,
            signal: Signal::new(hiplink_wire::SignalKind::PacketInd),
            bulk: BulkSet::single(bytes::Bytes::copy_from_slice(&[tag])),
        }
    }

    #[test]
    fn classes_start_open() {
        let gate = PortGate::new();
        for class in [TrafficClass::Controlled, TrafficClass::Uncontrolled] {
            assert_eq!(gate.lookup(class, peer(1)), PortPolicy::Open);
            assert_eq!(gate.outbound(class, peer(1)), TxVerdict::Forward);
            assert_eq!(gate.inbound(class, peer(1)), RxVerdict::Deliver);
        }
    }

    #[test]
    fn global_policy_ignores_the_address() {
        let gate = PortGate::new();
        gate.set_policy(TrafficClass::Controlled, PortPolicy::ClosedDiscard);

        assert_eq!(
            gate.lookup(TrafficClass::Controlled, peer(1)),
            PortPolicy::ClosedDiscard
        );
        assert_eq!(
            gate.lookup(TrafficClass::Controlled, peer(2)),
            PortPolicy::ClosedDiscard
        );
        // The other class is untouched.
        assert_eq!(
            gate.lookup(TrafficClass::Uncontrolled, peer(1)),
            PortPolicy::Open
        );
    }

    #[test]
    fn table_mode_matches_per_peer_and_defaults_open() {
        let gate = PortGate::new();
        gate.set_peer_policy(TrafficClass::Controlled, peer(1), PortPolicy::ClosedBlock);
        gate.set_peer_policy(TrafficClass::Controlled, peer(2), PortPolicy::ClosedDiscard);

        assert_eq!(
            gate.lookup(TrafficClass::Controlled, peer(1)),
            PortPolicy::ClosedBlock
        );
        assert_eq!(
            gate.lookup(TrafficClass::Controlled, peer(2)),
            PortPolicy::ClosedDiscard
        );
        assert_eq!(
            gate.lookup(TrafficClass::Controlled, peer(3)),
            PortPolicy::Open
        );

        // Updating an existing entry replaces its policy.
        gate.set_peer_policy(TrafficClass::Controlled, peer(1), PortPolicy::Open);
        assert_eq!(
            gate.lookup(TrafficClass::Controlled, peer(1)),
            PortPolicy::Open
        );
    }

    #[test]
    fn transmit_never_buffers() {
        let gate = PortGate::new();
        gate.set_policy(TrafficClass::Controlled, PortPolicy::ClosedBlock);

        assert_eq!(
            gate.outbound(TrafficClass::Controlled, peer(1)),
            TxVerdict::Busy
        );
        assert_eq!(gate.pending_len(TrafficClass::Controlled), 0);

        gate.set_policy(TrafficClass::Controlled, PortPolicy::ClosedDiscard);
        assert_eq!(
            gate.outbound(TrafficClass::Controlled, peer(1)),
            TxVerdict::Discard
        );
        assert_eq!(gate.stats(TrafficClass::Controlled).tx_discarded, 1);
    }

    #[test]
    fn replay_returns_each_packet_exactly_once() {
        let gate = PortGate::new();
        gate.set_policy(TrafficClass::Controlled, PortPolicy::ClosedBlock);

        assert_eq!(
            gate.inbound(TrafficClass::Controlled, peer(1)),
            RxVerdict::Defer
        );
        gate.defer(TrafficClass::Controlled, packet(1, peer(1)));

        let drained = gate.drain(TrafficClass::Controlled, Some(peer(1)));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].source, peer(1));

        // Nothing left for a second drain.
        assert!(gate.drain(TrafficClass::Controlled, Some(peer(1))).is_empty());
        assert_eq!(gate.pending_len(TrafficClass::Controlled), 0);
    }

    #[test]
    fn per_address_drain_leaves_other_peers_parked() {
        let gate = PortGate::new();
        gate.defer(TrafficClass::Controlled, packet(1, peer(1)));
        gate.defer(TrafficClass::Controlled, packet(2, peer(2)));
        gate.defer(TrafficClass::Controlled, packet(3, peer(1)));

        let drained = gate.drain(TrafficClass::Controlled, Some(peer(1)));
        assert_eq!(drained.len(), 2);
        // FIFO arrival order within the matching set.
        assert_eq!(drained[0].bulk.first().unwrap().as_ref(), &[1]);
        assert_eq!(drained[1].bulk.first().unwrap().as_ref(), &[3]);

        assert_eq!(gate.pending_len(TrafficClass::Controlled), 1);
        let rest = gate.drain(TrafficClass::Controlled, None);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].source, peer(2));
    }

    #[test]
    fn wildcard_drain_empties_the_class() {
        let gate = PortGate::new();
        gate.defer(TrafficClass::Uncontrolled, packet(1, peer(1)));
        gate.defer(TrafficClass::Uncontrolled, packet(2, peer(2)));

        assert_eq!(gate.drain(TrafficClass::Uncontrolled, None).len(), 2);
        assert_eq!(gate.pending_len(TrafficClass::Uncontrolled), 0);
        // The other class's list is independent.
        assert_eq!(gate.pending_len(TrafficClass::Controlled), 0);
    }

    #[test]
    fn inbound_discard_counts() {
        let gate = PortGate::new();
        gate.set_policy(TrafficClass::Controlled, PortPolicy::ClosedDiscard);

        assert_eq!(
            gate.inbound(TrafficClass::Controlled, peer(1)),
            RxVerdict::Discard
        );
        assert_eq!(
            gate.inbound(TrafficClass::Controlled, peer(2)),
            RxVerdict::Discard
        );
        let stats = gate.stats(TrafficClass::Controlled);
        assert_eq!(stats.rx_discarded, 2);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn classify_routes_pae_to_the_uncontrolled_port() {
        let mut eapol = vec![0u8; 14];
        eapol[12] = 0x88;
        eapol[13] = 0x8E;
        assert_eq!(TrafficClass::classify(&eapol), TrafficClass::Uncontrolled);

        let mut ip = vec![0u8; 14];
        ip[12] = 0x08;
        ip[13] = 0x00;
        assert_eq!(TrafficClass::classify(&ip), TrafficClass::Controlled);

        // A runt frame with no ethertype stays on the controlled port.
        assert_eq!(TrafficClass::classify(&[0u8; 6]), TrafficClass::Controlled);
    }
}
