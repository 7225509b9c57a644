//! Serialized record form of a test specification.
//!
//! These structs mirror the external JSON layout one-to-one. Signal maps
//! are keyed by fully-qualified names: `a2l_<point>` for calibration
//! signals, `<message>_<signal>` for bus signals. The `type` discriminator
//! and the special-step action stay plain strings here so the loader can
//! reject unknown tags with typed errors instead of a generic parse
//! failure.

use std::collections::BTreeMap;

use openhil_signal::WaveformKind;
use serde::{Deserialize, Serialize};

/// Step type discriminator for an ordinary stimulus step.
pub const STEP_TYPE_COMMON: &str = "common";

/// Step type discriminator for an out-of-band action step.
pub const STEP_TYPE_SPECIAL: &str = "special";

/// Top-level test specification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpecRecord {
    pub name: String,
    pub dscr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xray_id: Option<String>,
    pub used_signals: Vec<String>,
    pub initial_state: StepRecord,
    pub steps: Vec<StepRecord>,
}

/// One step record; fields unused by the step's type stay empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "type")]
    pub step_type: String,
    pub action: String,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub monitored_signals: BTreeMap<String, MonitoredSignalRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub logged_signals: BTreeMap<String, LoggedSignalRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub control_signals: BTreeMap<String, ControlSignalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_details: Option<serde_json::Value>,
}

/// Stimulus waveform attached to a control signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSignalRecord {
    pub form: WaveformKind,
    pub coef: Vec<f64>,
}

/// Expectation waveform plus its monitored time windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredSignalRecord {
    pub monitored_ranges: Vec<MonitoredRangeRecord>,
    pub form: WaveformKind,
    pub coef: Vec<f64>,
}

/// One monitored window; both ends inclusive, tolerance in percent of the
/// expected value (absolute when the expectation is zero).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitoredRangeRecord {
    pub start_ms: f64,
    pub stop_ms: f64,
    pub tolerance: f64,
}

/// Logged signals carry no parameters; the record is an empty object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedSignalRecord {}
