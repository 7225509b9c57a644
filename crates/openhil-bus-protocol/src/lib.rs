//! Bus message descriptors and frame encoding.
//!
//! This crate owns the read-only descriptor model for messages on the
//! CAN-like bus (bit positions, scaling, physical limits, value labels) and
//! the encoder that packs physical signal values into a fixed-width frame,
//! optionally applying counter + CRC end-to-end protection.
//!
//! Descriptors arrive as already-parsed JSON records from the
//! description-file collaborator; this crate never reads the textual
//! description formats itself.
//!
//! All encoding functions are pure: a failed encode leaves no caller-visible
//! state behind.

#![deny(static_mut_refs)]

pub mod crc8;
pub mod encode;
pub mod types;

pub use encode::{COUNTER_SUFFIX, CRC_SUFFIX, E2eOptions, EncodeError, encode};
pub use types::{BusDescription, BusMessageDef, BusSignalDef, MessageClass};
