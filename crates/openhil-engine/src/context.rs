//! Per-run shared state.
//!
//! Everything the two threads of a run share lives here, constructed fresh
//! per run and dropped at run end. No process-wide singletons.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{Receiver, Sender, unbounded};
use openhil_adapters::TelemetryBatch;
use parking_lot::Mutex;

use crate::fault::Fault;

/// A level-set binary signal.
///
/// `raise` and `is_raised` are the level semantics; `take` additionally
/// clears, which is how the single consumer of `step_advanced` must observe
/// it so a stale level is never attributed to a later step boundary.
#[derive(Debug, Default)]
pub(crate) struct Flag(AtomicBool);

impl Flag {
    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Observe and clear in one step. Single-consumer use only.
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Queues, signals and the sending-task ledger of one run.
pub(crate) struct RunContext {
    pub(crate) telemetry_tx: Sender<TelemetryBatch>,
    pub(crate) telemetry_rx: Receiver<TelemetryBatch>,
    pub(crate) fault_tx: Sender<Fault>,
    pub(crate) fault_rx: Receiver<Fault>,
    pub(crate) step_advanced: Flag,
    pub(crate) finished: Flag,
    pub(crate) aborted: Flag,
    /// Every periodic send task started during this run. Tasks live in the
    /// external transport; leaking one past run end is a resource bug, so
    /// each id is recorded exactly once.
    active_tasks: Mutex<Vec<String>>,
}

impl RunContext {
    pub(crate) fn new() -> Arc<Self> {
        let (telemetry_tx, telemetry_rx) = unbounded();
        let (fault_tx, fault_rx) = unbounded();
        Arc::new(Self {
            telemetry_tx,
            telemetry_rx,
            fault_tx,
            fault_rx,
            step_advanced: Flag::default(),
            finished: Flag::default(),
            aborted: Flag::default(),
            active_tasks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn track_task(&self, id: String) {
        let mut tasks = self.active_tasks.lock();
        if !tasks.contains(&id) {
            tasks.push(id);
        }
    }

    pub(crate) fn take_tasks(&self) -> Vec<String> {
        std::mem::take(&mut self.active_tasks.lock())
    }

    /// Drain every fault currently queued, in FIFO order.
    pub(crate) fn drain_faults(&self) -> Vec<Fault> {
        self.fault_rx.try_iter().collect()
    }
}
