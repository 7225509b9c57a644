//! Descriptor records for bus messages and their signals.
//!
//! The records mirror what the description-file collaborator supplies per
//! message: identity, byte length, classification, optional send period and
//! the per-signal layout (bit position/length, scale factor, physical
//! limits, optional raw-domain start value and value labels). They are
//! immutable for the duration of a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Classification of a bus message in the description file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    /// No classification present in the description file.
    #[default]
    Undefined,
    /// Message exists in the description but carries no test-relevant data.
    Unused,
    /// Message consumed by the device under test.
    Input,
    /// Message produced by the device under test.
    Output,
    /// Health/supervision message.
    Health,
}

/// Layout and scaling of one signal within a bus message.
///
/// `position` and `length` are in bits, counted from the least significant
/// bit of the message's accumulator. The physical value of a raw integer is
/// `raw * factor + offset`; `min`/`max` bound the physical value. An
/// optional `start_value` is an additive base in the raw domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSignalDef {
    pub name: String,
    pub position: u32,
    pub length: u32,
    pub factor: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub signal_type: Option<String>,
    #[serde(default)]
    pub start_value: Option<f64>,
    /// Value labels keyed by the decimal raw value.
    #[serde(default)]
    pub values: Option<BTreeMap<String, String>>,
    /// Name of the owning message; linked after deserialization.
    #[serde(skip)]
    pub parent: String,
    /// Description-file identifier this signal came from; linked after
    /// deserialization.
    #[serde(skip)]
    pub source: String,
    /// Classification of the owning message; linked after deserialization.
    #[serde(skip)]
    pub message_class: MessageClass,
}

/// One fixed-width message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessageDef {
    pub name: String,
    pub id: u32,
    /// Declared frame length in bytes.
    pub length: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub class: MessageClass,
    #[serde(default)]
    pub period_ms: Option<u64>,
    #[serde(default)]
    pub frame_format: Option<String>,
    pub signals: BTreeMap<String, BusSignalDef>,
}

/// All messages supplied by one bus description file.
#[derive(Debug, Clone, PartialEq)]
pub struct BusDescription {
    /// Identifier of the originating description file.
    pub source: String,
    pub messages: BTreeMap<String, BusMessageDef>,
}

impl BusDescription {
    /// Link the per-signal back references that the serialized records omit.
    pub fn new(source: impl Into<String>, mut messages: BTreeMap<String, BusMessageDef>) -> Self {
        let source = source.into();
        for message in messages.values_mut() {
            let parent = message.name.clone();
            let class = message.class;
            for signal in message.signals.values_mut() {
                signal.parent = parent.clone();
                signal.source = source.clone();
                signal.message_class = class;
            }
        }
        Self { source, messages }
    }

    /// Deserialize a description from its JSON record form.
    pub fn from_json(source: &str, json: &str) -> Result<Self, serde_json::Error> {
        let messages: BTreeMap<String, BusMessageDef> = serde_json::from_str(json)?;
        Ok(Self::new(source, messages))
    }

    /// Look up a fully-qualified `<message>_<signal>` name.
    pub fn find_spec_signal(&self, qualified: &str) -> Option<&BusSignalDef> {
        self.messages.iter().find_map(|(name, message)| {
            qualified
                .strip_prefix(name.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .and_then(|signal| message.signals.get(signal))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description_json() -> &'static str {
        r#"{
            "EngineCmd": {
                "name": "EngineCmd",
                "id": 256,
                "length": 8,
                "class": "input",
                "period_ms": 20,
                "signals": {
                    "Torque": {
                        "name": "Torque",
                        "position": 0,
                        "length": 16,
                        "factor": 0.5,
                        "offset": 0.0,
                        "min": 0.0,
                        "max": 1000.0,
                        "unit": "Nm"
                    }
                }
            }
        }"#
    }

    #[test]
    fn from_json_links_parent_source_and_class() -> Result<(), Box<dyn std::error::Error>> {
        let description = BusDescription::from_json("powertrain.dbc", description_json())?;
        let signal = description
            .find_spec_signal("EngineCmd_Torque")
            .ok_or("signal missing")?;
        assert_eq!(signal.parent, "EngineCmd");
        assert_eq!(signal.source, "powertrain.dbc");
        assert_eq!(signal.message_class, MessageClass::Input);
        Ok(())
    }

    #[test]
    fn find_spec_signal_requires_exact_qualified_name() -> Result<(), serde_json::Error> {
        let description = BusDescription::from_json("powertrain.dbc", description_json())?;
        assert!(description.find_spec_signal("EngineCmd_Torque").is_some());
        assert!(description.find_spec_signal("EngineCmd_Torqu").is_none());
        assert!(description.find_spec_signal("EngineCmdTorque").is_none());
        assert!(description.find_spec_signal("Other_Torque").is_none());
        Ok(())
    }

    #[test]
    fn missing_optional_fields_default() -> Result<(), serde_json::Error> {
        let json = r#"{
            "M": {
                "name": "M",
                "id": 1,
                "length": 2,
                "signals": {}
            }
        }"#;
        let description = BusDescription::from_json("minimal.dbc", json)?;
        let message = &description.messages["M"];
        assert_eq!(message.class, MessageClass::Undefined);
        assert_eq!(message.period_ms, None);
        assert!(message.description.is_empty());
        Ok(())
    }
}
