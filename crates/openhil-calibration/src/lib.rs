//! Calibration-point descriptors.
//!
//! Calibration signals are addressed by memory location on the device
//! rather than by a position on the bus. The description-file collaborator
//! supplies them as already-parsed JSON records; this crate holds the
//! read-only model and the qualified-name lookup used by the test
//! specification loader.

#![deny(static_mut_refs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prefix marking a calibration-sourced signal in a test specification.
pub const CALIBRATION_PREFIX: &str = "a2l_";

/// Parent name reported for every calibration signal.
pub const CALIBRATION_PARENT: &str = "a2l";

/// One memory-addressed calibration point on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub address: String,
    pub lower_limit: String,
    pub upper_limit: String,
    pub record_layout: String,
    /// Description-file identifier this point came from; linked after
    /// deserialization.
    #[serde(skip)]
    pub source: String,
}

/// All calibration points supplied by one description file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationDescription {
    pub source: String,
    pub points: BTreeMap<String, CalibrationPoint>,
}

impl CalibrationDescription {
    /// Link the per-point source reference that the serialized records omit.
    pub fn new(source: impl Into<String>, mut points: BTreeMap<String, CalibrationPoint>) -> Self {
        let source = source.into();
        for point in points.values_mut() {
            point.source = source.clone();
        }
        Self { source, points }
    }

    /// Deserialize a description from its JSON record form.
    pub fn from_json(source: &str, json: &str) -> Result<Self, serde_json::Error> {
        let points: BTreeMap<String, CalibrationPoint> = serde_json::from_str(json)?;
        Ok(Self::new(source, points))
    }

    /// Look up an `a2l_`-prefixed qualified name from a test specification.
    pub fn find_spec_signal(&self, qualified: &str) -> Option<&CalibrationPoint> {
        qualified
            .strip_prefix(CALIBRATION_PREFIX)
            .and_then(|name| self.points.get(name))
    }
}
