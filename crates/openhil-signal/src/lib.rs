//! Typed signal identity and the waveform evaluator.
//!
//! A [`Signal`] ties a test-visible name to its descriptor of origin — a
//! bus signal layout or a calibration point — plus direction and source
//! bookkeeping. A [`Waveform`](waveform::Waveform) turns elapsed time into
//! a numeric value; the same evaluator feeds both outgoing stimulus
//! references and monitoring expectations, so the two can never disagree.

#![deny(static_mut_refs)]

pub mod signal;
pub mod waveform;

pub use signal::{Signal, SignalDirection, SignalOrigin, SignalSource};
pub use waveform::{Waveform, WaveformError, WaveformKind, evaluate};
