//! The immutable step/specification model the engine runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use openhil_signal::{Signal, Waveform, WaveformError};
use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::records::{
    ControlSignalRecord, LoggedSignalRecord, MonitoredRangeRecord, MonitoredSignalRecord,
    STEP_TYPE_COMMON, STEP_TYPE_SPECIAL, StepRecord, TestSpecRecord,
};

/// Out-of-band actions a special step may dispatch to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialAction {
    Reboot,
    ResetPower,
    PowerOff,
    PowerOn,
    GetInfo,
    GetParameters,
    UpdateParameters,
    UpdateFirmware,
    GetReport,
    GetFram,
}

impl SpecialAction {
    fn name(self) -> &'static str {
        match self {
            SpecialAction::Reboot => "reboot",
            SpecialAction::ResetPower => "reset_power",
            SpecialAction::PowerOff => "power_off",
            SpecialAction::PowerOn => "power_on",
            SpecialAction::GetInfo => "get_info",
            SpecialAction::GetParameters => "get_parameters",
            SpecialAction::UpdateParameters => "update_parameters",
            SpecialAction::UpdateFirmware => "update_firmware",
            SpecialAction::GetReport => "get_report",
            SpecialAction::GetFram => "get_fram",
        }
    }
}

impl fmt::Display for SpecialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpecialAction {
    type Err = SpecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reboot" => Ok(SpecialAction::Reboot),
            "reset_power" => Ok(SpecialAction::ResetPower),
            "power_off" => Ok(SpecialAction::PowerOff),
            "power_on" => Ok(SpecialAction::PowerOn),
            "get_info" => Ok(SpecialAction::GetInfo),
            "get_parameters" => Ok(SpecialAction::GetParameters),
            "update_parameters" => Ok(SpecialAction::UpdateParameters),
            "update_firmware" => Ok(SpecialAction::UpdateFirmware),
            "get_report" => Ok(SpecialAction::GetReport),
            "get_fram" => Ok(SpecialAction::GetFram),
            other => Err(SpecError::UnknownAction(other.to_string())),
        }
    }
}

/// A stimulus signal plus the waveform producing its reference value.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSignal {
    pub signal: Signal,
    pub waveform: Waveform,
}

impl ControlSignal {
    /// Reference value at `elapsed_ms` since the owning step began.
    ///
    /// # Errors
    ///
    /// Propagates [`WaveformError`] for reserved waveform kinds.
    pub fn reference_value(&self, elapsed_ms: f64) -> Result<f64, WaveformError> {
        self.waveform.evaluate_at(elapsed_ms)
    }
}

/// One monitored time window; both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitoredRange {
    pub start_ms: f64,
    pub stop_ms: f64,
    /// Percent of |expected|, or an absolute bound when the percentage
    /// base works out to zero.
    pub tolerance: f64,
}

impl MonitoredRange {
    #[must_use]
    pub fn contains(&self, elapsed_ms: f64) -> bool {
        elapsed_ms >= self.start_ms && elapsed_ms <= self.stop_ms
    }
}

/// A telemetry signal verified against a waveform inside declared windows.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredSignal {
    pub signal: Signal,
    pub ranges: Vec<MonitoredRange>,
    pub waveform: Waveform,
}

impl MonitoredSignal {
    /// Expected value at `elapsed_ms` since the owning step began.
    ///
    /// # Errors
    ///
    /// Propagates [`WaveformError`] for reserved waveform kinds.
    pub fn expected_value(&self, elapsed_ms: f64) -> Result<f64, WaveformError> {
        self.waveform.evaluate_at(elapsed_ms)
    }

    /// First declared range containing `elapsed_ms`, if any.
    #[must_use]
    pub fn range_at(&self, elapsed_ms: f64) -> Option<(usize, &MonitoredRange)> {
        self.ranges
            .iter()
            .enumerate()
            .find(|(_, range)| range.contains(elapsed_ms))
    }
}

/// A signal recorded verbatim into the telemetry log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedSignal {
    pub signal: Signal,
}

/// Fields shared by both step kinds, keyed by fully-qualified signal name.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCore {
    pub action: String,
    pub duration_ms: f64,
    pub monitored: BTreeMap<String, MonitoredSignal>,
    pub logged: BTreeMap<String, LoggedSignal>,
}

/// An ordinary stimulus step.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonStep {
    pub core: StepCore,
    pub control: BTreeMap<String, ControlSignal>,
}

/// An out-of-band device action step.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialStep {
    pub core: StepCore,
    pub action: SpecialAction,
    pub details: serde_json::Value,
}

/// One phase of a test.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Common(CommonStep),
    Special(SpecialStep),
}

impl Step {
    #[must_use]
    pub fn core(&self) -> &StepCore {
        match self {
            Step::Common(step) => &step.core,
            Step::Special(step) => &step.core,
        }
    }

    #[must_use]
    pub fn action_label(&self) -> &str {
        &self.core().action
    }

    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.core().duration_ms
    }
}

/// A complete, resolved test specification.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSpecification {
    pub name: String,
    pub description: String,
    /// Caller-supplied test id; there is no derivation scheme.
    pub id: String,
    pub initial_state: CommonStep,
    pub steps: Vec<Step>,
    pub used_signals: Vec<String>,
}

impl TestSpecification {
    /// Build the model from its record form and the resolved signal map.
    ///
    /// # Errors
    ///
    /// [`SpecError::MissingTestId`] without an id;
    /// [`SpecError::UnsupportedStepType`] for unknown discriminators;
    /// [`SpecError::UnresolvedSignal`] for a referenced name missing from
    /// `signals`; [`SpecError::Waveform`] for coefficient mismatches.
    pub fn from_record(
        record: &TestSpecRecord,
        signals: &BTreeMap<String, Signal>,
    ) -> Result<Self, SpecError> {
        let id = record.xray_id.clone().ok_or(SpecError::MissingTestId)?;
        let initial_state = build_common_step(&record.initial_state, signals)?;
        let steps = record
            .steps
            .iter()
            .map(|step| build_step(step, signals))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: record.name.clone(),
            description: record.dscr.clone(),
            id,
            initial_state,
            steps,
            used_signals: record.used_signals.clone(),
        })
    }

    /// Every signal name referenced across initial state and steps
    /// (control, then monitored, then logged per step), first-seen order,
    /// duplicates suppressed.
    #[must_use]
    pub fn referenced_signals(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let push = |names: &mut Vec<String>, name: &String| {
            if !names.contains(name) {
                names.push(name.clone());
            }
        };
        for name in self.initial_state.control.keys() {
            push(&mut seen, name);
        }
        for name in self.initial_state.core.monitored.keys() {
            push(&mut seen, name);
        }
        for name in self.initial_state.core.logged.keys() {
            push(&mut seen, name);
        }
        for step in &self.steps {
            if let Step::Common(common) = step {
                for name in common.control.keys() {
                    push(&mut seen, name);
                }
            }
            for name in step.core().monitored.keys() {
                push(&mut seen, name);
            }
            for name in step.core().logged.keys() {
                push(&mut seen, name);
            }
        }
        seen
    }

    /// Re-emit the record form, with `used_signals` re-derived from the
    /// steps.
    #[must_use]
    pub fn to_record(&self) -> TestSpecRecord {
        TestSpecRecord {
            name: self.name.clone(),
            dscr: self.description.clone(),
            xray_id: Some(self.id.clone()),
            used_signals: self.referenced_signals(),
            initial_state: common_step_record(&self.initial_state),
            steps: self.steps.iter().map(step_record).collect(),
        }
    }

    /// Serialize the record form as pretty JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_record())
    }
}

fn checked_waveform(
    name: &str,
    kind: openhil_signal::WaveformKind,
    coefficients: &[f64],
) -> Result<Waveform, SpecError> {
    let expected = kind.coefficient_count();
    if coefficients.len() < expected {
        return Err(SpecError::Waveform {
            signal: name.to_string(),
            source: WaveformError::MissingCoefficients {
                kind,
                expected,
                actual: coefficients.len(),
            },
        });
    }
    Ok(Waveform::new(kind, coefficients.to_vec()))
}

fn resolve<'a>(
    name: &str,
    signals: &'a BTreeMap<String, Signal>,
) -> Result<&'a Signal, SpecError> {
    signals
        .get(name)
        .ok_or_else(|| SpecError::UnresolvedSignal(name.to_string()))
}

fn build_core(
    record: &StepRecord,
    signals: &BTreeMap<String, Signal>,
) -> Result<StepCore, SpecError> {
    let mut monitored = BTreeMap::new();
    for (name, entry) in &record.monitored_signals {
        let signal = resolve(name, signals)?.clone();
        monitored.insert(
            name.clone(),
            MonitoredSignal {
                signal,
                ranges: entry
                    .monitored_ranges
                    .iter()
                    .map(|range| MonitoredRange {
                        start_ms: range.start_ms,
                        stop_ms: range.stop_ms,
                        tolerance: range.tolerance,
                    })
                    .collect(),
                waveform: checked_waveform(name, entry.form, &entry.coef)?,
            },
        );
    }
    let mut logged = BTreeMap::new();
    for name in record.logged_signals.keys() {
        let signal = resolve(name, signals)?.clone();
        logged.insert(name.clone(), LoggedSignal { signal });
    }
    Ok(StepCore {
        action: record.action.clone(),
        duration_ms: record.duration_ms,
        monitored,
        logged,
    })
}

fn build_common_step(
    record: &StepRecord,
    signals: &BTreeMap<String, Signal>,
) -> Result<CommonStep, SpecError> {
    let core = build_core(record, signals)?;
    let mut control = BTreeMap::new();
    for (name, entry) in &record.control_signals {
        let signal = resolve(name, signals)?.clone();
        control.insert(
            name.clone(),
            ControlSignal {
                signal,
                waveform: checked_waveform(name, entry.form, &entry.coef)?,
            },
        );
    }
    Ok(CommonStep { core, control })
}

fn build_special_step(
    record: &StepRecord,
    signals: &BTreeMap<String, Signal>,
) -> Result<SpecialStep, SpecError> {
    let core = build_core(record, signals)?;
    let action = record
        .step_action
        .as_deref()
        .ok_or_else(|| SpecError::MissingAction(record.action.clone()))?
        .parse()?;
    Ok(SpecialStep {
        core,
        action,
        details: record.action_details.clone().unwrap_or(serde_json::Value::Null),
    })
}

fn build_step(
    record: &StepRecord,
    signals: &BTreeMap<String, Signal>,
) -> Result<Step, SpecError> {
    match record.step_type.as_str() {
        STEP_TYPE_COMMON => Ok(Step::Common(build_common_step(record, signals)?)),
        STEP_TYPE_SPECIAL => Ok(Step::Special(build_special_step(record, signals)?)),
        other => Err(SpecError::UnsupportedStepType(other.to_string())),
    }
}

fn core_record(core: &StepCore, step_type: &str) -> StepRecord {
    StepRecord {
        step_type: step_type.to_string(),
        action: core.action.clone(),
        duration_ms: core.duration_ms,
        monitored_signals: core
            .monitored
            .iter()
            .map(|(name, monitored)| {
                (
                    name.clone(),
                    MonitoredSignalRecord {
                        monitored_ranges: monitored
                            .ranges
                            .iter()
                            .map(|range| MonitoredRangeRecord {
                                start_ms: range.start_ms,
                                stop_ms: range.stop_ms,
                                tolerance: range.tolerance,
                            })
                            .collect(),
                        form: monitored.waveform.kind,
                        coef: monitored.waveform.coefficients.clone(),
                    },
                )
            })
            .collect(),
        logged_signals: core
            .logged
            .keys()
            .map(|name| (name.clone(), LoggedSignalRecord {}))
            .collect(),
        control_signals: BTreeMap::new(),
        step_action: None,
        action_details: None,
    }
}

fn common_step_record(step: &CommonStep) -> StepRecord {
    let mut record = core_record(&step.core, STEP_TYPE_COMMON);
    record.control_signals = step
        .control
        .iter()
        .map(|(name, control)| {
            (
                name.clone(),
                ControlSignalRecord {
                    form: control.waveform.kind,
                    coef: control.waveform.coefficients.clone(),
                },
            )
        })
        .collect();
    record
}

fn step_record(step: &Step) -> StepRecord {
    match step {
        Step::Common(common) => common_step_record(common),
        Step::Special(special) => {
            let mut record = core_record(&special.core, STEP_TYPE_SPECIAL);
            record.step_action = Some(special.action.to_string());
            if !special.details.is_null() {
                record.action_details = Some(special.details.clone());
            }
            record
        }
    }
}
