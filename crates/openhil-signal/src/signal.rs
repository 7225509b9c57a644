//! Signal identity and descriptor linkage.

use std::sync::Arc;

use openhil_bus_protocol::{BusSignalDef, MessageClass};
use openhil_calibration::{CALIBRATION_PARENT, CalibrationPoint};

/// Where a signal physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// Carried by a bus message.
    Bus,
    /// Addressed by memory location on the device.
    Calibration,
}

/// Direction of a signal relative to the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDirection {
    Input,
    Output,
    Both,
}

/// The underlying descriptor a signal was resolved from.
///
/// The engine never interprets this; it is handed back to the codec and the
/// device collaborator, which do.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOrigin {
    Bus(Arc<BusSignalDef>),
    Calibration(Arc<CalibrationPoint>),
}

/// A named physical quantity referenced by a test specification.
///
/// Equality is structural over every field, including the origin
/// descriptor's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub name: String,
    /// Owning message name, or the calibration-table name.
    pub parent: String,
    pub source_kind: SignalSource,
    /// Identifier of the description file or channel this came from.
    pub source: String,
    pub direction: SignalDirection,
    /// Last telemetry value seen for this signal.
    pub value: f64,
    pub origin: SignalOrigin,
}

impl Signal {
    /// Build a signal from a bus-signal descriptor.
    ///
    /// Signals on Input-class messages are readable back from the device,
    /// so they count as both directions; everything else is stimulus-only.
    pub fn from_bus_def(def: &BusSignalDef) -> Self {
        let direction = if def.message_class == MessageClass::Input {
            SignalDirection::Both
        } else {
            SignalDirection::Output
        };
        Self {
            name: def.name.clone(),
            parent: def.parent.clone(),
            source_kind: SignalSource::Bus,
            source: def.source.clone(),
            direction,
            value: 0.0,
            origin: SignalOrigin::Bus(Arc::new(def.clone())),
        }
    }

    /// Build a signal from a calibration point.
    pub fn from_calibration_point(point: &CalibrationPoint) -> Self {
        Self {
            name: point.name.clone(),
            parent: CALIBRATION_PARENT.to_string(),
            source_kind: SignalSource::Calibration,
            source: point.source.clone(),
            direction: SignalDirection::Input,
            value: 0.0,
            origin: SignalOrigin::Calibration(Arc::new(point.clone())),
        }
    }
}
