//! Test specification model and loader.
//!
//! A test specification arrives as a JSON record (see [`records`]): a name,
//! an id, the flat list of fully-qualified signal names it uses, an initial
//! state and an ordered step sequence. The [`loader`] resolves the signal
//! names against the loaded bus/calibration descriptions and produces the
//! immutable [`model`] the orchestration engine runs.

#![deny(static_mut_refs)]

pub mod error;
pub mod loader;
pub mod model;
pub mod records;

pub use error::SpecError;
pub use loader::resolve_signals;
pub use model::{
    CommonStep, ControlSignal, LoggedSignal, MonitoredRange, MonitoredSignal, SpecialAction,
    SpecialStep, Step, StepCore, TestSpecification,
};
pub use records::{
    ControlSignalRecord, LoggedSignalRecord, MonitoredRangeRecord, MonitoredSignalRecord,
    STEP_TYPE_COMMON, STEP_TYPE_SPECIAL, StepRecord, TestSpecRecord,
};
