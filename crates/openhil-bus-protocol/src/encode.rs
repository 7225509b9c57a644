//! Packing of physical signal values into a protected bus frame.
//!
//! The encoder works on a 64-bit accumulator: every declared signal span is
//! first cleared out of an all-ones default so padding bits are fully
//! defined, then each supplied value is scaled into the raw domain and OR-ed
//! into place. With end-to-end protection enabled, the 4-bit alive counter
//! and the SAE-J1850 CRC byte are placed into the message's `_CNT`/`_CRC`
//! signals. The rendered frame is always 16 hex digits (8 bytes,
//! byte-reversed) regardless of the declared message length — the wire
//! convention the external adapter expects.

use std::collections::BTreeMap;

use crate::crc8;
use crate::types::{BusMessageDef, BusSignalDef};

/// Suffix naming the end-to-end alive-counter signal of a message.
pub const COUNTER_SUFFIX: &str = "_CNT";

/// Suffix naming the end-to-end CRC signal of a message.
pub const CRC_SUFFIX: &str = "_CRC";

/// End-to-end protection parameters for one encode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E2eOptions {
    /// Protocol data id fed into the CRC ahead of the payload.
    pub data_id: u16,
    /// Alive counter; only the low 4 bits are transmitted.
    pub counter: u8,
}

/// The exhaustive error surface of the encoder.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    /// A supplied value names a signal the message does not declare.
    #[error("message {message} has no signal named {signal}")]
    UnknownSignal { message: String, signal: String },

    /// A supplied physical value lies outside the declared `[min, max]`.
    #[error("value {value} for signal {signal} is outside [{min}, {max}]")]
    ValueOutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Protection was requested but the message declares no counter or CRC
    /// signal. This is a description-file configuration error, not a
    /// runtime fault.
    #[error("message {message} has no signal ending in {suffix}; end-to-end protection cannot be applied")]
    MissingE2eSignal {
        message: String,
        suffix: &'static str,
    },
}

fn span_mask(length: u32) -> u64 {
    if length >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << length) - 1
    }
}

fn find_suffixed<'a>(
    message: &'a BusMessageDef,
    suffix: &'static str,
) -> Result<&'a BusSignalDef, EncodeError> {
    message
        .signals
        .values()
        .find(|signal| signal.name.ends_with(suffix))
        .ok_or_else(|| EncodeError::MissingE2eSignal {
            message: message.name.clone(),
            suffix,
        })
}

fn e2e_crc(frame: u64, payload_len: usize, data_id: u16) -> u8 {
    let mut crc = 0x00 ^ 0xFF;
    crc = crc8::update(crc, &[(data_id & 0xFF) as u8, (data_id >> 8) as u8]);
    let bytes = frame.to_le_bytes();
    crc = crc8::update(crc, &bytes[..payload_len.min(bytes.len())]);
    crc ^ 0xFF
}

/// Encode `values` into the frame of `message`, rendered as a 16-hex-digit
/// string.
///
/// # Errors
///
/// Returns [`EncodeError::UnknownSignal`] for a value naming an undeclared
/// signal, [`EncodeError::ValueOutOfRange`] for a value outside its
/// physical bounds and [`EncodeError::MissingE2eSignal`] when protection is
/// requested on a message without counter/CRC signals.
pub fn encode(
    message: &BusMessageDef,
    values: &BTreeMap<String, f64>,
    e2e: Option<E2eOptions>,
) -> Result<String, EncodeError> {
    let mut frame = u64::MAX;

    // Clear every declared span, set or not, so padding bits are defined.
    for signal in message.signals.values() {
        frame &= !(span_mask(signal.length) << signal.position);
    }

    for (name, &value) in values {
        let signal =
            message
                .signals
                .get(name)
                .ok_or_else(|| EncodeError::UnknownSignal {
                    message: message.name.clone(),
                    signal: name.clone(),
                })?;
        if value < signal.min || value > signal.max {
            return Err(EncodeError::ValueOutOfRange {
                signal: name.clone(),
                value,
                min: signal.min,
                max: signal.max,
            });
        }
        let mut raw = (value / signal.factor).floor() as i64;
        if let Some(start) = signal.start_value {
            // start_value is an additive base in the raw domain.
            raw += start as i64;
        }
        let raw = (raw as u64) & span_mask(signal.length);
        frame |= raw << signal.position;
    }

    if let Some(e2e) = e2e {
        let counter = find_suffixed(message, COUNTER_SUFFIX)?;
        frame |= u64::from(e2e.counter & 0x0F) << counter.position;

        let crc_slot = find_suffixed(message, CRC_SUFFIX)?;
        let payload_len = usize::from(message.length.saturating_sub(1));
        let crc = e2e_crc(frame, payload_len, e2e.data_id);
        frame |= u64::from(crc) << crc_slot.position;
    }

    Ok(format!("{:016x}", frame.swap_bytes()))
}
