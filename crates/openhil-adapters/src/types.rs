//! Shared data types of the adapter contracts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// One decoded telemetry message: unqualified signal names and their
/// physical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub message: String,
    pub signals: BTreeMap<String, f64>,
}

impl TelemetryRecord {
    /// Iterate signals under their fully-qualified `<message>_<signal>`
    /// names.
    pub fn qualified(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        self.signals
            .iter()
            .map(|(name, value)| (format!("{}_{name}", self.message), *value))
    }
}

/// Batch of records delivered by one read-task poll.
pub type TelemetryBatch = Vec<TelemetryRecord>;

/// Callback invoked by the transport for every telemetry batch. Must not
/// block.
pub type TelemetryCallback = Arc<dyn Fn(TelemetryBatch) + Send + Sync>;

/// A periodic send task: one message, refreshed values, protection flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendingTask {
    /// Bus-description name of the message being sent.
    pub message: String,
    pub frame_id: u32,
    /// CAN channel the task transmits on.
    pub channel: String,
    pub source_address: String,
    pub destination_address: String,
    /// Unqualified signal name → physical value.
    pub signals: BTreeMap<String, f64>,
    pub e2e_protection: bool,
    pub period_ms: u64,
}

/// Summary of an active send task, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendingTaskInfo {
    pub id: String,
    #[serde(default)]
    pub destination_address: Option<String>,
}

/// Frame filter entry of the periodic read task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub frame_id: u32,
    pub message: String,
}

/// Which signals of a message the read task should decode and report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMapping {
    pub message: String,
    pub signals: Vec<String>,
}

/// Configuration of the periodic read task, derived from the loaded bus
/// descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingTaskConfig {
    pub interval_ms: u64,
    pub filters: Vec<MessageFilter>,
    pub mapping: Vec<SignalMapping>,
}

/// Static identity of a device on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
    /// CAN channel the device is attached to.
    pub channel: String,
    /// Bus source address of the device.
    pub source_address: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub firmware: String,
}

impl DeviceInfo {
    /// Free-form identity line for logs and `get_info` steps.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "serial={} channel={} address={} product={} firmware={}",
            self.serial, self.channel, self.source_address, self.product, self.firmware
        )
    }
}

/// Selectable transport backends.
///
/// Only `Sim` runs in-process; the remaining kinds are served by external
/// adapter processes and report [`AdapterError::UnsupportedBackend`] when
/// selected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    Comm,
    DtlV01,
    DtlV02,
    CanFlasher,
    Edic,
    Pcan,
    Vector,
    Sim,
}

impl AdapterKind {
    fn name(self) -> &'static str {
        match self {
            AdapterKind::Comm => "comm",
            AdapterKind::DtlV01 => "dtl-v01",
            AdapterKind::DtlV02 => "dtl-v02",
            AdapterKind::CanFlasher => "can-flasher",
            AdapterKind::Edic => "edic",
            AdapterKind::Pcan => "pcan",
            AdapterKind::Vector => "vector",
            AdapterKind::Sim => "sim",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AdapterKind {
    type Err = AdapterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "comm" => Ok(AdapterKind::Comm),
            "dtl-v01" => Ok(AdapterKind::DtlV01),
            "dtl-v02" => Ok(AdapterKind::DtlV02),
            "can-flasher" => Ok(AdapterKind::CanFlasher),
            "edic" => Ok(AdapterKind::Edic),
            "pcan" => Ok(AdapterKind::Pcan),
            "vector" => Ok(AdapterKind::Vector),
            "sim" => Ok(AdapterKind::Sim),
            other => Err(AdapterError::UnknownBackend(other.to_string())),
        }
    }
}
