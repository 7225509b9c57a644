//! Telemetry monitor thread.
//!
//! Single consumer of the telemetry queue. Owns the current-step pointer,
//! the elapsed-time origin and the logged-value cache exclusively; nothing
//! else may touch them. Polls with short bounded waits so `aborted` and
//! `finished` are observed promptly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::RecvTimeoutError;
use openhil_adapters::TelemetryBatch;
use openhil_spec::{StepCore, TestSpecification};
use tracing::{debug, error};

use crate::context::RunContext;
use crate::fault::Fault;
use crate::logfile::{LoggedCache, TelemetryLog};
use crate::runner::RunError;

const POLL: Duration = Duration::from_millis(1);

/// Percentage-of-expected tolerance bound; absolute when the percentage
/// base works out to zero (expected exactly 0).
pub(crate) fn tolerance_bound(expected: f64, tolerance: f64) -> f64 {
    let base = tolerance / 100.0 * expected.abs();
    if base == 0.0 { tolerance } else { base }
}

/// A measured value exactly at the bound is accepted.
pub(crate) fn within_tolerance(expected: f64, measured: f64, tolerance: f64) -> bool {
    (expected - measured).abs() <= tolerance_bound(expected, tolerance)
}

pub(crate) struct Monitor {
    spec: Arc<TestSpecification>,
    ctx: Arc<RunContext>,
    log: TelemetryLog,
}

impl Monitor {
    pub(crate) fn new(
        spec: Arc<TestSpecification>,
        ctx: Arc<RunContext>,
        log: TelemetryLog,
    ) -> Self {
        Self { spec, ctx, log }
    }

    /// Poll until `finished` or `aborted`; returns the finalized CSV path.
    pub(crate) fn run(mut self) -> Result<PathBuf, RunError> {
        let mut cache = LoggedCache::default();
        // The initial state acts as step 0 until the first boundary.
        let mut current: &StepCore = &self.spec.initial_state.core;
        let mut boundaries = 0usize;
        let mut origin = Instant::now();
        let mut failure: Option<RunError> = None;

        loop {
            loop {
                match self.ctx.telemetry_rx.try_recv() {
                    Ok(batch) => {
                        if let Err(run_error) =
                            self.process_batch(&batch, current, origin, &mut cache)
                        {
                            error!(%run_error, "monitor stopping on evaluation failure");
                            failure = Some(run_error);
                            self.ctx.aborted.raise();
                        }
                        self.log.append_row(&cache)?;
                    }
                    Err(_) => break,
                }
            }

            if self.ctx.step_advanced.take() {
                origin = Instant::now();
                if let Some(step) = self.spec.steps.get(boundaries) {
                    current = step.core();
                }
                boundaries += 1;
                debug!(boundaries, "monitor advanced to next step");
            }

            if self.ctx.aborted.is_raised() || self.ctx.finished.is_raised() {
                break;
            }

            match self.ctx.telemetry_rx.recv_timeout(POLL) {
                Ok(batch) => {
                    if let Err(run_error) =
                        self.process_batch(&batch, current, origin, &mut cache)
                    {
                        error!(%run_error, "monitor stopping on evaluation failure");
                        failure = Some(run_error);
                        self.ctx.aborted.raise();
                    }
                    self.log.append_row(&cache)?;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }

        let path = self.log.finalize(&cache)?;
        match failure {
            Some(run_error) => Err(run_error),
            None => Ok(path),
        }
    }

    fn process_batch(
        &self,
        batch: &TelemetryBatch,
        current: &StepCore,
        origin: Instant,
        cache: &mut LoggedCache,
    ) -> Result<(), RunError> {
        for record in batch {
            for (qualified, value) in record.qualified() {
                if current.logged.contains_key(&qualified) {
                    cache.insert(&qualified, value);
                }
                let Some(monitored) = current.monitored.get(&qualified) else {
                    continue;
                };
                let elapsed_ms = origin.elapsed().as_secs_f64() * 1000.0;
                let Some((range_index, range)) = monitored.range_at(elapsed_ms) else {
                    continue;
                };
                let expected = monitored.expected_value(elapsed_ms)?;
                if !within_tolerance(expected, value, range.tolerance) {
                    let fault = Fault {
                        signal: qualified,
                        expected,
                        tolerance: range.tolerance,
                        measured: value,
                        range_index,
                        elapsed_ms,
                    };
                    debug!(%fault, "tolerance violation");
                    // The driver may already have stopped draining; a
                    // dropped fault at teardown is fine.
                    let _ = self.ctx.fault_tx.send(fault);
                }
            }
        }
        Ok(())
    }
}
