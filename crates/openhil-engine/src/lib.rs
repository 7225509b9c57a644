//! Test orchestration engine.
//!
//! A run is two independently scheduled threads sharing a per-run
//! [`context::RunContext`]:
//!
//! - the **scenario driver** (a cooperative task on a current-thread tokio
//!   runtime inside its own OS thread) sequences steps, drives stimulus
//!   through the bus codec and the device collaborator, and collects the
//!   per-step verdicts;
//! - the **monitor** (a plain polling thread) drains telemetry, checks it
//!   against the time-windowed expectations of the current step and feeds
//!   faults back to the driver.
//!
//! Coordination is by unbounded channels and three level-set flags
//! (`step_advanced`, `finished`, `aborted`). Cancellation is cooperative:
//! raising `aborted` is the only forcible stop. The runner joins both
//! threads before reporting.

#![deny(static_mut_refs)]

mod context;
mod fault;
mod logfile;
mod monitor;
mod runner;
mod scenario;

pub use fault::Fault;
pub use runner::{RunError, RunReport, RunnerConfig, StepOutcome, TestRunner};
