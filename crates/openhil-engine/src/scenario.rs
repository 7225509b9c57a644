//! Scenario driver.
//!
//! One cooperative task per run, executed on a current-thread runtime
//! inside its own OS thread. Suspension points are exactly the declared
//! adapter/device awaits and the per-step duration sleep — never
//! preemption — so statement order within a step is deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use openhil_adapters::{
    DeviceUnderTest, MessageFilter, ReadingTaskConfig, SendingTask, SignalMapping,
    TelemetryCallback, TransportAdapter,
};
use openhil_bus_protocol::{BusMessageDef, E2eOptions, encode};
use openhil_signal::SignalOrigin;
use openhil_spec::{CommonStep, SpecialAction, SpecialStep, Step, TestSpecification};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::logfile::RunLog;
use crate::runner::{RunError, RunnerConfig, StepOutcome};

/// Source address used for every stimulus frame.
const SOURCE_ADDRESS: &str = "FE";

/// Fallback period for messages without a declared one.
const DEFAULT_SEND_PERIOD_MS: u64 = 100;

pub(crate) struct ScenarioDriver {
    pub(crate) spec: Arc<TestSpecification>,
    pub(crate) catalog: Arc<BTreeMap<String, BusMessageDef>>,
    /// Bus-description artifact identifiers to upload on first read-task
    /// configuration.
    pub(crate) descriptions: Vec<String>,
    pub(crate) transport: Arc<dyn TransportAdapter>,
    pub(crate) dut: Arc<dyn DeviceUnderTest>,
    pub(crate) gateway: Option<Arc<dyn DeviceUnderTest>>,
    pub(crate) ctx: Arc<RunContext>,
    pub(crate) config: RunnerConfig,
}

impl ScenarioDriver {
    /// Run the whole scenario; returns the run verdict and per-step
    /// outcomes.
    pub(crate) async fn run(
        &self,
        log: &mut RunLog,
    ) -> Result<(bool, Vec<StepOutcome>), RunError> {
        self.transport.connect().await?;
        let result = self.run_connected(log).await;
        if let Err(disconnect) = self.transport.disconnect().await {
            warn!(%disconnect, "transport disconnect failed after run");
        }
        result
    }

    async fn run_connected(
        &self,
        log: &mut RunLog,
    ) -> Result<(bool, Vec<StepOutcome>), RunError> {
        self.dut.connect().await?;
        if let Some(gateway) = &self.gateway {
            gateway.connect().await?;
        }

        log.header(&self.spec, &self.dut.info().render())?;

        let mut outcomes = Vec::with_capacity(self.spec.steps.len() + 1);
        self.set_initial_state(log, &mut outcomes).await?;
        self.ctx.step_advanced.raise();
        self.configure_reading_task(true).await?;

        let mut test_status = true;
        for (index, step) in self.spec.steps.iter().enumerate() {
            if self.ctx.aborted.is_raised() {
                return Err(RunError::RunAbort(
                    "run aborted before step execution".to_string(),
                ));
            }
            let outcome = self.perform_step(step, index + 1, log).await?;
            if !outcome.passed {
                test_status = false;
            }
            outcomes.push(outcome);
            self.ctx.step_advanced.raise();
        }

        log.test_status(test_status)?;
        info!(test = %self.spec.id, passed = test_status, "scenario finished");
        self.ctx.finished.raise();

        let started = self.ctx.take_tasks();
        if !started.is_empty() {
            self.transport.stop_sending_tasks(&started).await?;
        }
        Ok((test_status, outcomes))
    }

    /// Stop leftover tasks addressed to this run's devices, reboot, then
    /// execute the initial state as step 0. Its faults are reported but do
    /// not feed the run verdict.
    async fn set_initial_state(
        &self,
        log: &mut RunLog,
        outcomes: &mut Vec<StepOutcome>,
    ) -> Result<(), RunError> {
        let mut stale = Vec::new();
        for task in self.transport.sending_tasks().await? {
            let Some(destination) = task.destination_address else {
                continue;
            };
            if destination == self.dut.info().source_address
                || self
                    .gateway
                    .as_ref()
                    .is_some_and(|gateway| destination == gateway.info().source_address)
            {
                stale.push(task.id);
            }
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "stopping leftover sending tasks");
            self.transport.stop_sending_tasks(&stale).await?;
        }

        self.dut.reboot().await?;
        let initial = Step::Common(self.spec.initial_state.clone());
        let outcome = self.perform_step(&initial, 0, log).await?;
        outcomes.push(outcome);
        Ok(())
    }

    /// Execute one step: its action concurrently with the duration sleep,
    /// then the fault drain and verdict line.
    async fn perform_step(
        &self,
        step: &Step,
        number: usize,
        log: &mut RunLog,
    ) -> Result<StepOutcome, RunError> {
        log.step_header(number, step.action_label())?;

        let duration = Duration::from_secs_f64(step.duration_ms().max(0.0) / 1000.0);
        let action = async {
            match step {
                Step::Common(common) => self.perform_common_step(common).await,
                Step::Special(special) => self.perform_special_step(special, log).await,
            }
        };
        let (action_result, ()) = tokio::join!(action, sleep(duration));
        action_result?;

        let faults = self.ctx.drain_faults();
        let passed = faults.is_empty();
        for fault in &faults {
            log.line(&fault.to_string())?;
        }
        log.step_status(passed)?;

        Ok(StepOutcome {
            number,
            action: step.action_label().to_string(),
            passed,
            faults,
        })
    }

    /// Evaluate every control signal at step start, write calibration
    /// points directly and batch bus signals per owning message into
    /// periodic send tasks.
    async fn perform_common_step(&self, step: &CommonStep) -> Result<(), RunError> {
        let mut per_message: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for control in step.control.values() {
            let value = control.reference_value(0.0)?;
            match &control.signal.origin {
                SignalOrigin::Bus(_) => {
                    per_message
                        .entry(control.signal.parent.clone())
                        .or_default()
                        .insert(control.signal.name.clone(), value);
                }
                SignalOrigin::Calibration(point) => {
                    self.dut.calibrate(point, value).await?;
                }
            }
        }

        for (message, signals) in per_message {
            let definition = self
                .catalog
                .get(&message)
                .ok_or_else(|| RunError::UnknownMessage(message.clone()))?;
            // Validate the batch through the codec before the transport
            // takes over periodic re-encoding with a live counter.
            let e2e = self.config.e2e_protection.then_some(E2eOptions {
                data_id: (definition.id & 0xFFFF) as u16,
                counter: 0,
            });
            let frame = encode(definition, &signals, e2e)?;
            debug!(message = %message, frame = %frame, "validated stimulus frame");

            let target = self.gateway.as_ref().unwrap_or(&self.dut);
            let task = SendingTask {
                message: message.clone(),
                frame_id: definition.id,
                channel: target.info().channel.clone(),
                source_address: SOURCE_ADDRESS.to_string(),
                destination_address: target.info().source_address.clone(),
                signals,
                e2e_protection: self.config.e2e_protection,
                period_ms: definition.period_ms.unwrap_or(DEFAULT_SEND_PERIOD_MS),
            };
            let id = self.transport.start_sending_task(task).await?;
            self.ctx.track_task(id);
        }
        Ok(())
    }

    /// Dispatch the out-of-band action. Declared-but-unimplemented
    /// variants fail with a typed error; nothing unwinds past the caller.
    async fn perform_special_step(
        &self,
        step: &SpecialStep,
        log: &mut RunLog,
    ) -> Result<(), RunError> {
        match step.action {
            SpecialAction::Reboot => {
                self.dut.reboot().await?;
                self.configure_reading_task(false).await?;
            }
            SpecialAction::PowerOff => self.dut.power_off().await?,
            SpecialAction::PowerOn => self.dut.power_on().await?,
            SpecialAction::GetInfo => log.line(&self.dut.info().render())?,
            SpecialAction::GetParameters => {
                let parameters = self.dut.get_parameters().await?;
                log.line(&serde_json::to_string(&parameters)?)?;
            }
            SpecialAction::UpdateParameters => {
                self.dut.update_parameters(&step.details).await?;
            }
            SpecialAction::GetFram => {
                self.dut.read_retained_memory().await?;
            }
            SpecialAction::ResetPower
            | SpecialAction::UpdateFirmware
            | SpecialAction::GetReport => {
                return Err(RunError::UnsupportedAction(step.action));
            }
        }
        Ok(())
    }

    /// Start (or restart after a reboot) the periodic telemetry read task.
    /// The first call also uploads the bus description artifacts.
    async fn configure_reading_task(&self, first_call: bool) -> Result<(), RunError> {
        if first_call {
            for source in &self.descriptions {
                self.transport.upload_bus_description(source).await?;
            }
        }
        let config = ReadingTaskConfig {
            interval_ms: self.config.read_interval_ms,
            filters: self
                .catalog
                .values()
                .map(|message| MessageFilter {
                    frame_id: message.id,
                    message: message.name.clone(),
                })
                .collect(),
            mapping: self
                .catalog
                .values()
                .map(|message| SignalMapping {
                    message: message.name.clone(),
                    signals: message.signals.keys().cloned().collect(),
                })
                .collect(),
        };
        let telemetry = self.ctx.telemetry_tx.clone();
        let callback: TelemetryCallback = Arc::new(move |batch| {
            // The monitor may already be gone at teardown.
            let _ = telemetry.send(batch);
        });
        self.transport.start_reading_task(config, callback).await?;
        Ok(())
    }
}
