//! Run ownership: thread lifecycle, verdict, artifacts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use openhil_adapters::{AdapterError, DeviceUnderTest, TransportAdapter};
use openhil_bus_protocol::{BusMessageDef, EncodeError};
use openhil_signal::WaveformError;
use openhil_spec::{SpecialAction, TestSpecification};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::RunContext;
use crate::fault::Fault;
use crate::logfile::{RunLog, TelemetryLog};
use crate::monitor::Monitor;
use crate::scenario::ScenarioDriver;

/// Poll interval of the supervising wait loop.
const SUPERVISE_POLL: Duration = Duration::from_millis(100);

/// Unrecoverable run failures. Monitoring faults are not here — they only
/// feed the verdict.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Thread start failure or another condition the run cannot survive.
    #[error("run aborted: {0}")]
    RunAbort(String),

    /// Transport or device operation failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Stimulus frame could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// A reserved waveform kind was exercised.
    #[error(transparent)]
    Waveform(#[from] WaveformError),

    /// A control signal's owning message is absent from the descriptions.
    #[error("message {0} is not present in the bus descriptions")]
    UnknownMessage(String),

    /// A declared-but-unimplemented special action was exercised.
    #[error("special-step action {0} is not implemented")]
    UnsupportedAction(SpecialAction),

    /// Artifact I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Parameter payload could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Engine configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Directory receiving the run log and telemetry CSV.
    pub log_dir: PathBuf,
    /// Apply counter + CRC protection to every stimulus frame.
    pub e2e_protection: bool,
    /// Poll interval of the transport's telemetry read task.
    pub read_interval_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            e2e_protection: false,
            read_interval_ms: 100,
        }
    }
}

/// Verdict and fault record of one executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Step number as reported in the run log; the initial state is 0.
    pub number: usize,
    pub action: String,
    pub passed: bool,
    pub faults: Vec<Fault>,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Overall verdict: failed iff at least one numbered step failed.
    pub passed: bool,
    pub step_outcomes: Vec<StepOutcome>,
    pub run_log: PathBuf,
    pub telemetry_log: PathBuf,
}

/// Owns the collaborators and drives complete runs.
pub struct TestRunner {
    config: RunnerConfig,
    transport: Arc<dyn TransportAdapter>,
    dut: Arc<dyn DeviceUnderTest>,
    gateway: Option<Arc<dyn DeviceUnderTest>>,
    catalog: Arc<BTreeMap<String, BusMessageDef>>,
    descriptions: Vec<String>,
}

impl TestRunner {
    pub fn new(
        config: RunnerConfig,
        transport: Arc<dyn TransportAdapter>,
        dut: Arc<dyn DeviceUnderTest>,
        catalog: BTreeMap<String, BusMessageDef>,
        descriptions: Vec<String>,
    ) -> Self {
        Self {
            config,
            transport,
            dut,
            gateway: None,
            catalog: Arc::new(catalog),
            descriptions,
        }
    }

    /// Route end-to-end protected stimulus through a gateway device.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn DeviceUnderTest>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Execute `spec` to completion.
    ///
    /// Spawns the scenario and monitor threads, supervises the run flags
    /// and joins both threads before reporting — no thread outlives the
    /// returned verdict.
    ///
    /// # Errors
    ///
    /// Any [`RunError`]; monitoring faults are never errors.
    pub fn run(&self, spec: TestSpecification) -> Result<RunReport, RunError> {
        std::fs::create_dir_all(&self.config.log_dir)?;
        let spec = Arc::new(spec);
        let ctx = RunContext::new();

        let mut run_log = RunLog::create(&self.config.log_dir, &spec.id)?;
        let telemetry_log = TelemetryLog::create(&self.config.log_dir, &spec.id)?;

        info!(test = %spec.id, name = %spec.name, "starting run");

        let monitor = Monitor::new(spec.clone(), ctx.clone(), telemetry_log);
        let monitor_handle = thread::Builder::new()
            .name("openhil-monitor".to_string())
            .spawn(move || monitor.run())
            .map_err(|spawn| RunError::RunAbort(format!("monitor thread: {spawn}")))?;

        let driver = ScenarioDriver {
            spec: spec.clone(),
            catalog: self.catalog.clone(),
            descriptions: self.descriptions.clone(),
            transport: self.transport.clone(),
            dut: self.dut.clone(),
            gateway: self.gateway.clone(),
            ctx: ctx.clone(),
            config: self.config.clone(),
        };
        let scenario_ctx = ctx.clone();
        let scenario_handle = thread::Builder::new()
            .name("openhil-scenario".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|build| RunError::RunAbort(format!("scenario runtime: {build}")))?;
                let (scenario_result, log_path) = runtime.block_on(async move {
                    let result = driver.run(&mut run_log).await;
                    (result, run_log.finish())
                });
                if scenario_result.is_err() {
                    // Unblock the monitor; cancellation is cooperative.
                    scenario_ctx.aborted.raise();
                }
                let (passed, outcomes) = scenario_result?;
                Ok::<_, RunError>((passed, outcomes, log_path?))
            })
            .map_err(|spawn| RunError::RunAbort(format!("scenario thread: {spawn}")))?;

        loop {
            if ctx.finished.is_raised() || ctx.aborted.is_raised() {
                break;
            }
            if scenario_handle.is_finished() {
                // The driver raises a flag on every exit path; reaching
                // here means it died without one, so release the monitor.
                ctx.aborted.raise();
                break;
            }
            thread::sleep(SUPERVISE_POLL);
        }

        let scenario_result = scenario_handle
            .join()
            .map_err(|_| RunError::RunAbort("scenario thread panicked".to_string()))?;
        let monitor_result = monitor_handle
            .join()
            .map_err(|_| RunError::RunAbort("monitor thread panicked".to_string()))?;

        let (passed, step_outcomes, run_log) = match scenario_result {
            Ok(outcome) => outcome,
            Err(scenario_error) => {
                // When the monitor died first the driver only saw the
                // abort flag; the monitor's failure is the root cause.
                monitor_result?;
                return Err(scenario_error);
            }
        };
        let telemetry_log = monitor_result?;

        info!(test = %spec.id, passed, "run complete");
        Ok(RunReport {
            passed,
            step_outcomes,
            run_log,
            telemetry_log,
        })
    }
}
