//! The per-device session context.
//!
//! One `HipSession` owns every engine component for one managed device:
//! registry, dispatcher, port gate, request channel, link state, transmit
//! queue, and the hardware worker. There is no process-wide state; a
//! host driving two devices simply holds two sessions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use hiplink_bus::{
    BusDriver, BusError, FaultObserver, HardwareWorker, LinkState, OutboundFrame, RunRequest,
    TxQueue,
};
use hiplink_wire::{self as wire, BulkSet, PeerAddress, Signal};
use tracing::{debug, warn};

use crate::client::{Reply, SignalClient};
use crate::dispatch::{DispatchStats, SignalDispatcher};
use crate::error::{EngineError, Result};
use crate::lock;
use crate::portgate::{PortGate, TrafficClass, TxVerdict};
use crate::registry::{ClientHandle, ClientRegistry};
use crate::request::{RequestChannel, STATUS_LINK_FAULT};

/// Fault code reported when the transport faulted.
pub const FAULT_CODE_TRANSPORT: u32 = 1;
/// Fault code reported on a bus I/O failure.
pub const FAULT_CODE_IO: u32 = 2;
/// Fault code reported when the device disappeared.
pub const FAULT_CODE_DEVICE_GONE: u32 = 3;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait applied by [`HipSession::request`] when the caller passes no
    /// explicit timeout.
    pub request_timeout: Duration,
    /// Seed for the worker's first wait; `Some(ZERO)` runs one service
    /// pass immediately after bring-up.
    pub startup_poll: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            startup_poll: Some(Duration::ZERO),
        }
    }
}

/// Transmit outcome for gated data traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Sent,
    /// Discarded by port policy and counted; not an error for the caller.
    Discarded,
}

/// Engine parts handed to the driver factory at bring-up.
///
/// The driver pops outbound work from `tx` and feeds inbound buffers into
/// `dispatcher`, both from the worker thread only.
pub struct SessionParts {
    pub tx: TxQueue,
    pub dispatcher: Arc<SignalDispatcher>,
    pub link: Arc<LinkState>,
}

struct FaultRelay {
    link: Arc<LinkState>,
    requests: Arc<RequestChannel>,
    dispatcher: Arc<SignalDispatcher>,
    tx: TxQueue,
}

impl FaultObserver for FaultRelay {
    fn on_transport_fault(&self, error: &BusError) {
        self.link.set_down();
        let flushed = self.tx.clear();
        let failed_pending = self.requests.fail_pending(STATUS_LINK_FAULT);
        warn!(%error, flushed, failed_pending, "transport fault, link marked down");

        let code = match error {
            BusError::Fault(_) => FAULT_CODE_TRANSPORT,
            BusError::Io(_) => FAULT_CODE_IO,
            BusError::DeviceRemoved => FAULT_CODE_DEVICE_GONE,
        };
        self.dispatcher
            .dispatch_signal(Signal::fault_ind(code), BulkSet::empty());
    }
}

/// The per-device context owning every engine component.
pub struct HipSession {
    registry: Arc<ClientRegistry>,
    dispatcher: Arc<SignalDispatcher>,
    ports: Arc<PortGate>,
    requests: Arc<RequestChannel>,
    link: Arc<LinkState>,
    tx: TxQueue,
    tx_guard: Mutex<()>,
    worker: HardwareWorker,
    config: SessionConfig,
}

impl HipSession {
    /// Bring a session up: wire the engine parts together, build the
    /// caller's driver from them, and spawn the hardware worker.
    pub fn start<F>(config: SessionConfig, driver: F) -> Result<Arc<Self>>
    where
        F: FnOnce(&SessionParts) -> Box<dyn BusDriver>,
    {
        let registry = Arc::new(ClientRegistry::new());
        let ports = Arc::new(PortGate::new());
        let dispatcher = Arc::new(SignalDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&ports),
        ));
        let requests = Arc::new(RequestChannel::new());
        let link = Arc::new(LinkState::new());
        let tx = TxQueue::new();

        let parts = SessionParts {
            tx: tx.clone(),
            dispatcher: Arc::clone(&dispatcher),
            link: Arc::clone(&link),
        };
        let driver = driver(&parts);

        let relay = Arc::new(FaultRelay {
            link: Arc::clone(&link),
            requests: Arc::clone(&requests),
            dispatcher: Arc::clone(&dispatcher),
            tx: tx.clone(),
        });
        let worker = HardwareWorker::spawn(driver, relay, config.startup_poll)?;

        Ok(Arc::new(Self {
            registry,
            dispatcher,
            ports,
            requests,
            link,
            tx,
            tx_guard: Mutex::new(()),
            worker,
            config,
        }))
    }

    /// Register a client at bring-up.
    pub fn register_client(&self, callback: Arc<dyn SignalClient>) -> Result<ClientHandle> {
        self.registry.register(callback)
    }

    /// Deregister a client at teardown. Safe against in-flight dispatch.
    pub fn deregister_client(&self, handle: &ClientHandle) -> bool {
        self.registry.deregister(handle)
    }

    /// Assign the management role.
    pub fn set_management(&self, handle: &ClientHandle) {
        self.dispatcher.set_management(handle);
    }

    /// Assign or clear the monitor role.
    pub fn set_monitor(&self, handle: Option<&ClientHandle>) {
        self.dispatcher.set_monitor(handle);
    }

    /// Assign or clear the raw-logging sink role.
    pub fn set_logging_sink(&self, handle: Option<&ClientHandle>) {
        self.dispatcher.set_logging_sink(handle);
    }

    /// Encode a signal and queue it for the worker.
    ///
    /// The encode+enqueue window is atomic with respect to other concurrent
    /// senders; the lock is never held while waiting for a reply.
    pub fn send_signal(&self, signal: &Signal, bulk: BulkSet) -> Result<()> {
        if !self.link.is_up() {
            return Err(EngineError::LinkDown);
        }
        {
            let _guard = lock(&self.tx_guard);
            let frame = wire::encode_to_bytes(signal)?;
            self.tx.push(OutboundFrame {
                frame,
                bulk: bulk.into_payloads(),
            });
        }
        match self.worker.request_run() {
            RunRequest::Accepted => Ok(()),
            RunRequest::Rejected => Err(EngineError::LinkDown),
        }
    }

    /// Queue a pre-encoded signal buffer.
    pub fn send_raw(&self, frame: &[u8], bulk: BulkSet) -> Result<()> {
        // Full validation up front; the worker only ever sees well-formed
        // buffers.
        wire::decode(frame)?;
        if !self.link.is_up() {
            return Err(EngineError::LinkDown);
        }
        {
            let _guard = lock(&self.tx_guard);
            self.tx.push(OutboundFrame {
                frame: Bytes::copy_from_slice(frame),
                bulk: bulk.into_payloads(),
            });
        }
        match self.worker.request_run() {
            RunRequest::Accepted => Ok(()),
            RunRequest::Rejected => Err(EngineError::LinkDown),
        }
    }

    /// Transmit-side port gate for data traffic, classed by the bulk
    /// frame's ethertype.
    pub fn send_packet(&self, signal: &Signal, bulk: BulkSet) -> Result<TxOutcome> {
        let class = bulk
            .first()
            .map(|frame| TrafficClass::classify(frame.as_ref()))
            .unwrap_or(TrafficClass::Controlled);
        let peer = signal.peer_address().unwrap_or_default();
        match self.ports.outbound(class, peer) {
            TxVerdict::Forward => {
                self.send_signal(signal, bulk)?;
                Ok(TxOutcome::Sent)
            }
            TxVerdict::Discard => {
                debug!(%peer, ?class, "outbound packet discarded by port policy");
                Ok(TxOutcome::Discarded)
            }
            TxVerdict::Busy => Err(EngineError::PortSuspended),
        }
    }

    /// Issue a blocking request and wait for its correlated reply.
    ///
    /// At most one request is in flight per session. The signal's sender id
    /// is stamped from the handle so the device's reply routes back to the
    /// caller; `None` for `timeout` applies the session default.
    pub fn request(
        &self,
        handle: &ClientHandle,
        signal: &Signal,
        bulk: BulkSet,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        let holder = self
            .registry
            .holder(handle)
            .ok_or(EngineError::StaleHandle)?;
        let timeout = timeout.unwrap_or(self.config.request_timeout);

        let ticket = self.requests.begin(holder)?;

        let stamped = signal.clone().with_sender(handle.sender_id());
        self.send_signal(&stamped, bulk)?;

        match ticket.wait(timeout) {
            Ok((status, Some(mut reply))) => {
                reply.status = status;
                Ok(reply)
            }
            // Failed by a transport fault: status only, no payload.
            Ok((_, None)) => Err(EngineError::LinkDown),
            Err(EngineError::Timeout(elapsed)) => {
                warn!(kind = %signal.kind, timeout = ?elapsed, "request timed out, arming diagnostic capture");
                self.worker.request_diagnostic();
                Err(EngineError::Timeout(elapsed))
            }
            Err(error) => Err(error),
        }
    }

    /// Complete the in-flight request from a management callback.
    ///
    /// Returns false if nothing was pending (a stale reply).
    pub fn complete_reply(&self, signal: Signal, bulk: BulkSet) -> bool {
        self.requests.complete_reply(signal, bulk)
    }

    /// The request channel, for management callbacks that recognize
    /// correlated replies.
    pub fn requests(&self) -> &Arc<RequestChannel> {
        &self.requests
    }

    /// Reopen a class/peer: drain matching deferred packets in FIFO order
    /// and either redeliver them (bypassing the gate) or free them.
    pub fn reopen(
        &self,
        class: TrafficClass,
        address: Option<PeerAddress>,
        deliver: bool,
    ) -> usize {
        let drained = self.ports.drain(class, address);
        let count = drained.len();
        if deliver {
            for packet in drained {
                self.dispatcher.deliver_packet(packet.signal, packet.bulk);
            }
        }
        debug!(?class, count, deliver, "reopened port");
        count
    }

    /// Clear an outstanding transport fault and bring the link back up.
    pub fn clear_fault(&self) -> bool {
        let cleared = self.worker.clear_fault();
        if cleared {
            self.link.set_up();
        }
        cleared
    }

    /// The port gate, for policy installation.
    pub fn ports(&self) -> &PortGate {
        &self.ports
    }

    /// The hardware worker handle.
    pub fn worker(&self) -> &HardwareWorker {
        &self.worker
    }

    /// Dispatcher counter snapshot.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// True while the managed link is up.
    pub fn link_is_up(&self) -> bool {
        self.link.is_up()
    }

    /// Tear the session down: wake any request waiter, stop the worker,
    /// mark the link down, and free everything still parked or queued.
    pub fn stop(&self) {
        self.requests.shutdown();
        self.worker.stop();
        self.link.set_down();
        let flushed = self.tx.clear();
        if flushed > 0 {
            debug!(flushed, "flushed transmit queue at teardown");
        }
        for class in [TrafficClass::Controlled, TrafficClass::Uncontrolled] {
            let freed = self.ports.drain(class, None).len();
            if freed > 0 {
                debug!(?class, freed, "freed deferred packets at teardown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hiplink_wire::{packet_body, SignalKind};

    use super::*;
    use crate::portgate::PortPolicy;

    struct NullDriver;

    impl BusDriver for NullDriver {
        fn service(&mut self) -> hiplink_bus::Result<Option<Duration>> {
            Ok(None)
        }
    }

    fn null_session() -> Arc<HipSession> {
        HipSession::start(SessionConfig::default(), |_parts| Box::new(NullDriver)).unwrap()
    }

    #[test]
    fn send_signal_queues_and_wakes_the_worker() {
        let session = null_session();
        session
            .send_signal(&Signal::new(SignalKind::MgtEventInd), BulkSet::empty())
            .unwrap();
        session.stop();
    }

    #[test]
    fn send_raw_rejects_junk() {
        let session = null_session();
        let err = session
            .send_raw(&[0xFE, 0xCA, 0, 0, 0, 0], BulkSet::empty())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Wire(wire::WireError::UnknownSignal { id: 0xCAFE })
        ));
        session.stop();
    }

    #[test]
    fn sending_after_stop_reports_link_down() {
        let session = null_session();
        session.stop();
        let err = session
            .send_signal(&Signal::new(SignalKind::MgtEventInd), BulkSet::empty())
            .unwrap_err();
        assert!(matches!(err, EngineError::LinkDown));
    }

    #[test]
    fn blocked_port_pushes_transmit_back_to_the_caller() {
        let session = null_session();
        session
            .ports()
            .set_policy(TrafficClass::Controlled, PortPolicy::ClosedBlock);

        let signal = Signal::new(SignalKind::PacketReq)
            .with_body(packet_body(0, 0, PeerAddress([9; 6]), 0));
        let err = session
            .send_packet(&signal, BulkSet::single(Bytes::from(vec![0u8; 20])))
            .unwrap_err();
        assert!(matches!(err, EngineError::PortSuspended));

        session
            .ports()
            .set_policy(TrafficClass::Controlled, PortPolicy::ClosedDiscard);
        let outcome = session
            .send_packet(&signal, BulkSet::single(Bytes::from(vec![0u8; 20])))
            .unwrap();
        assert_eq!(outcome, TxOutcome::Discarded);
        session.stop();
    }

    #[test]
    fn request_with_stale_handle_fails_fast() {
        let session = null_session();
        struct Silent;
        impl SignalClient for Silent {
            fn on_signal(&self, _signal: &Signal, _bulk: &BulkSet) {}
        }
        let handle = session.register_client(Arc::new(Silent)).unwrap();
        session.deregister_client(&handle);

        let err = session
            .request(
                &handle,
                &Signal::new(SignalKind::MgtGetReq),
                BulkSet::empty(),
                Some(Duration::from_millis(10)),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleHandle));
        session.stop();
    }
}
