//! The single thread permitted to perform transport transactions.
//!
//! Every other context schedules work with [`HardwareWorker::request_run`]
//! and shares state behind narrow locks; only the worker calls into the
//! [`BusDriver`]. A transport fault blocks the worker until external logic
//! clears it; while blocked, new scheduling requests are rejected, never
//! queued.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::driver::{BusDriver, FaultObserver};
use crate::error::Result;
use crate::lock;

/// Lifecycle phase of the hardware worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Waiting for a wake or the poll deadline.
    Idle,
    /// A run has been requested and not yet consumed.
    Scheduled,
    /// A transport fault is outstanding; scheduling requests are rejected.
    Blocked,
    /// Stop requested, not yet observed by the loop.
    Stopping,
    /// The loop has exited.
    Stopped,
}

/// Outcome of [`HardwareWorker::request_run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    Accepted,
    /// The worker is blocked on a fault (or stopping); the request was not
    /// queued. The fault must be resolved first.
    Rejected,
}

struct WorkerState {
    phase: WorkerPhase,
    diagnostic_pending: bool,
    resume_pending: bool,
}

struct Shared {
    state: Mutex<WorkerState>,
    wake: Condvar,
}

/// Handle to the transport thread.
pub struct HardwareWorker {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HardwareWorker {
    /// Spawn the worker thread.
    ///
    /// `startup_poll` seeds the first wait; the usual `Some(ZERO)` makes the
    /// worker run one service pass immediately after spawn. Afterwards each
    /// wait is bounded by the driver's self-reported poll hint.
    pub fn spawn(
        driver: Box<dyn BusDriver>,
        observer: Arc<dyn FaultObserver>,
        startup_poll: Option<Duration>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState {
                phase: WorkerPhase::Idle,
                diagnostic_pending: false,
                resume_pending: false,
            }),
            wake: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("hiplink-bus".into())
            .spawn(move || run_loop(loop_shared, driver, observer, startup_poll))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Request one service pass. Callable from any context; never blocks.
    pub fn request_run(&self) -> RunRequest {
        let mut state = lock(&self.shared.state);
        match state.phase {
            WorkerPhase::Blocked | WorkerPhase::Stopping | WorkerPhase::Stopped => {
                RunRequest::Rejected
            }
            WorkerPhase::Idle | WorkerPhase::Scheduled => {
                state.phase = WorkerPhase::Scheduled;
                self.shared.wake.notify_one();
                RunRequest::Accepted
            }
        }
    }

    /// Clear an outstanding fault and schedule a recovery pass.
    ///
    /// Returns false if the worker was not blocked. The recovery pass
    /// captures diagnostics and re-enables interrupts before servicing.
    pub fn clear_fault(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if state.phase != WorkerPhase::Blocked {
            return false;
        }
        state.phase = WorkerPhase::Scheduled;
        state.resume_pending = true;
        self.shared.wake.notify_one();
        true
    }

    /// Arm a diagnostic capture before the next service pass.
    ///
    /// While blocked, the capture is deferred until recovery.
    pub fn request_diagnostic(&self) {
        let mut state = lock(&self.shared.state);
        state.diagnostic_pending = true;
        if state.phase == WorkerPhase::Idle {
            state.phase = WorkerPhase::Scheduled;
        }
        self.shared.wake.notify_one();
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> WorkerPhase {
        lock(&self.shared.state).phase
    }

    /// Stop the worker and join its thread.
    ///
    /// The stop is observed within one wait bound. Idempotent, and safe
    /// when the loop already exited on its own (device removed).
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.phase != WorkerPhase::Stopped {
                state.phase = WorkerPhase::Stopping;
                self.shared.wake.notify_all();
            }
        }
        let thread = lock(&self.thread).take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("hardware worker panicked during shutdown");
            }
        }
    }
}

impl Drop for HardwareWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    shared: Arc<Shared>,
    mut driver: Box<dyn BusDriver>,
    observer: Arc<dyn FaultObserver>,
    startup_poll: Option<Duration>,
) {
    let mut poll_hint = startup_poll;
    debug!("hardware worker started");

    loop {
        let mut capture = false;
        let mut resume = false;
        {
            let deadline = poll_hint.map(|hint| Instant::now() + hint);
            let mut state = lock(&shared.state);
            loop {
                match state.phase {
                    WorkerPhase::Stopping | WorkerPhase::Stopped => {
                        let _ = driver.set_interrupts(false);
                        state.phase = WorkerPhase::Stopped;
                        shared.wake.notify_all();
                        debug!("hardware worker stopped");
                        return;
                    }
                    WorkerPhase::Scheduled => {
                        state.phase = WorkerPhase::Idle;
                        break;
                    }
                    WorkerPhase::Blocked => {
                        state = shared
                            .wake
                            .wait(state)
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                    }
                    WorkerPhase::Idle => match deadline {
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                break;
                            }
                            let (guard, _) = shared
                                .wake
                                .wait_timeout(state, deadline - now)
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            state = guard;
                        }
                        None => {
                            state = shared
                                .wake
                                .wait(state)
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                        }
                    },
                }
            }
            if state.resume_pending {
                state.resume_pending = false;
                resume = true;
            }
            if state.diagnostic_pending {
                state.diagnostic_pending = false;
                capture = true;
            }
        }

        if capture {
            driver.capture_diagnostic();
        }
        if resume {
            let _ = driver.set_interrupts(true);
        }

        match driver.service() {
            Ok(hint) => poll_hint = hint,
            Err(error) if error.is_terminal() => {
                warn!(%error, "transport gone; hardware worker exiting");
                observer.on_transport_fault(&error);
                let mut state = lock(&shared.state);
                state.phase = WorkerPhase::Stopped;
                shared.wake.notify_all();
                return;
            }
            Err(error) => {
                warn!(%error, "transport fault; blocking hardware worker");
                let _ = driver.set_interrupts(false);
                {
                    let mut state = lock(&shared.state);
                    state.phase = WorkerPhase::Blocked;
                    state.diagnostic_pending = true;
                }
                observer.on_transport_fault(&error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::BusError;

    #[derive(Clone, Default)]
    struct Probes {
        services: Arc<AtomicUsize>,
        diagnostics: Arc<AtomicUsize>,
        interrupts: Arc<Mutex<Vec<bool>>>,
    }

    struct ScriptedDriver {
        probes: Probes,
        script: Mutex<VecDeque<Result<Option<Duration>>>>,
    }

    impl ScriptedDriver {
        fn new(probes: Probes, script: Vec<Result<Option<Duration>>>) -> Box<Self> {
            Box::new(Self {
                probes,
                script: Mutex::new(script.into()),
            })
        }
    }

    impl BusDriver for ScriptedDriver {
        fn service(&mut self) -> Result<Option<Duration>> {
            self.probes.services.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }

        fn set_interrupts(&mut self, enabled: bool) -> Result<()> {
            self.probes.interrupts.lock().unwrap().push(enabled);
            Ok(())
        }

        fn capture_diagnostic(&mut self) {
            self.probes.diagnostics.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        faults: AtomicUsize,
    }

    impl FaultObserver for CountingObserver {
        fn on_transport_fault(&self, _error: &BusError) {
            self.faults.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(what: &str, predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn request_run_triggers_one_service_pass() {
        let probes = Probes::default();
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![]),
            Arc::new(CountingObserver::default()),
            None,
        )
        .unwrap();

        assert_eq!(probes.services.load(Ordering::SeqCst), 0);
        assert_eq!(worker.request_run(), RunRequest::Accepted);
        wait_until("first service pass", || {
            probes.services.load(Ordering::SeqCst) == 1
        });

        worker.stop();
    }

    #[test]
    fn startup_poll_primes_the_first_pass() {
        let probes = Probes::default();
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![]),
            Arc::new(CountingObserver::default()),
            Some(Duration::ZERO),
        )
        .unwrap();

        wait_until("startup service pass", || {
            probes.services.load(Ordering::SeqCst) >= 1
        });
        worker.stop();
    }

    #[test]
    fn poll_hint_drives_periodic_service_without_wakes() {
        let probes = Probes::default();
        let hint = Some(Duration::from_millis(5));
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![Ok(hint), Ok(hint), Ok(hint)]),
            Arc::new(CountingObserver::default()),
            Some(Duration::ZERO),
        )
        .unwrap();

        // Three timed passes follow the primed one with no request_run.
        wait_until("periodic service passes", || {
            probes.services.load(Ordering::SeqCst) >= 4
        });
        worker.stop();
    }

    #[test]
    fn fault_blocks_worker_and_rejects_new_work() {
        let probes = Probes::default();
        let observer = Arc::new(CountingObserver::default());
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![Err(BusError::Fault("crc".into()))]),
            observer.clone(),
            Some(Duration::ZERO),
        )
        .unwrap();

        wait_until("worker blocked", || worker.phase() == WorkerPhase::Blocked);
        assert_eq!(observer.faults.load(Ordering::SeqCst), 1);
        assert_eq!(worker.request_run(), RunRequest::Rejected);
        // Interrupts were disabled on the way into the fault.
        assert_eq!(probes.interrupts.lock().unwrap().as_slice(), &[false]);

        worker.stop();
    }

    #[test]
    fn clear_fault_recovers_with_diagnostic_capture() {
        let probes = Probes::default();
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![Err(BusError::Fault("crc".into()))]),
            Arc::new(CountingObserver::default()),
            Some(Duration::ZERO),
        )
        .unwrap();

        wait_until("worker blocked", || worker.phase() == WorkerPhase::Blocked);
        assert!(worker.clear_fault());
        wait_until("recovery service pass", || {
            probes.services.load(Ordering::SeqCst) == 2
        });

        assert_eq!(probes.diagnostics.load(Ordering::SeqCst), 1);
        // Disabled at fault time, re-enabled on recovery.
        assert_eq!(
            probes.interrupts.lock().unwrap().as_slice(),
            &[false, true]
        );
        assert_eq!(worker.request_run(), RunRequest::Accepted);

        worker.stop();
        assert!(!worker.clear_fault());
    }

    #[test]
    fn request_diagnostic_arms_a_capture() {
        let probes = Probes::default();
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![]),
            Arc::new(CountingObserver::default()),
            None,
        )
        .unwrap();

        worker.request_diagnostic();
        wait_until("diagnostic capture", || {
            probes.diagnostics.load(Ordering::SeqCst) == 1
        });
        worker.stop();
    }

    #[test]
    fn stop_is_observed_and_idempotent() {
        let probes = Probes::default();
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![]),
            Arc::new(CountingObserver::default()),
            None,
        )
        .unwrap();

        worker.stop();
        assert_eq!(worker.phase(), WorkerPhase::Stopped);
        worker.stop();
        assert_eq!(worker.phase(), WorkerPhase::Stopped);
        assert_eq!(worker.request_run(), RunRequest::Rejected);
    }

    #[test]
    fn device_removed_exits_the_loop_on_its_own() {
        let probes = Probes::default();
        let observer = Arc::new(CountingObserver::default());
        let worker = HardwareWorker::spawn(
            ScriptedDriver::new(probes.clone(), vec![Err(BusError::DeviceRemoved)]),
            observer.clone(),
            Some(Duration::ZERO),
        )
        .unwrap();

        wait_until("loop exit", || worker.phase() == WorkerPhase::Stopped);
        assert_eq!(observer.faults.load(Ordering::SeqCst), 1);
        // Stop after a self-exit still joins exactly once.
        worker.stop();
    }
}
