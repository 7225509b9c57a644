//! Time-parameterized waveforms.
//!
//! A waveform maps elapsed milliseconds since the owning step began to a
//! numeric value. Stimulus references and monitoring expectations both go
//! through [`evaluate`]; the contract is shared on purpose so the driver
//! and the monitor can never drift apart.
//!
//! Only `Constant` and `Line` evaluate today. The remaining kinds are
//! reserved by the specification format and fail with a typed error —
//! never a silent approximation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The waveform kinds a specification may declare.
///
/// Coefficient slots per kind:
/// - `Constant`: `[amplitude]` — y = amplitude
/// - `Pwm`: `[amplitude, offset, frequency_hz, duty_cycle_pct]`
/// - `Line`: `[slope, offset]` — y = slope * t_s + offset
/// - `Parabola`: `[a, b, c]` — y = a*t² + b*t + c
/// - `Root`: `[a, b]` — y = a*√t + b
/// - `Hyperbola`: `[a, b]` — y = a/t + b
/// - `Exponential`: `[a, b]` — y = a*eᵗ + b
/// - `Sine`: `[amplitude, frequency, phase]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformKind {
    Constant,
    Pwm,
    Line,
    Parabola,
    Root,
    Hyperbola,
    Exponential,
    Sine,
}

impl WaveformKind {
    /// Number of coefficient slots the kind declares.
    #[must_use]
    pub fn coefficient_count(self) -> usize {
        match self {
            WaveformKind::Constant => 1,
            WaveformKind::Pwm => 4,
            WaveformKind::Line => 2,
            WaveformKind::Parabola => 3,
            WaveformKind::Root => 2,
            WaveformKind::Hyperbola => 2,
            WaveformKind::Exponential => 2,
            WaveformKind::Sine => 3,
        }
    }
}

impl fmt::Display for WaveformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaveformKind::Constant => "constant",
            WaveformKind::Pwm => "pwm",
            WaveformKind::Line => "line",
            WaveformKind::Parabola => "parabola",
            WaveformKind::Root => "root",
            WaveformKind::Hyperbola => "hyperbola",
            WaveformKind::Exponential => "exponential",
            WaveformKind::Sine => "sine",
        };
        f.write_str(name)
    }
}

/// Evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaveformError {
    /// The kind is declared by the format but has no evaluation semantics
    /// yet.
    #[error("waveform kind {0} is not supported")]
    Unsupported(WaveformKind),

    /// Fewer coefficients than the kind's slot count.
    #[error("waveform {kind} needs {expected} coefficients, got {actual}")]
    MissingCoefficients {
        kind: WaveformKind,
        expected: usize,
        actual: usize,
    },
}

/// Evaluate a waveform at `elapsed_ms` milliseconds.
///
/// # Errors
///
/// [`WaveformError::Unsupported`] for every kind other than `Constant` and
/// `Line`; [`WaveformError::MissingCoefficients`] when the coefficient
/// sequence is shorter than the kind requires.
pub fn evaluate(
    kind: WaveformKind,
    coefficients: &[f64],
    elapsed_ms: f64,
) -> Result<f64, WaveformError> {
    match kind {
        WaveformKind::Constant => match coefficients {
            [amplitude, ..] => Ok(*amplitude),
            [] => Err(WaveformError::MissingCoefficients {
                kind,
                expected: 1,
                actual: 0,
            }),
        },
        WaveformKind::Line => match coefficients {
            [slope, offset, ..] => Ok(slope * (elapsed_ms / 1000.0) + offset),
            short => Err(WaveformError::MissingCoefficients {
                kind,
                expected: 2,
                actual: short.len(),
            }),
        },
        unsupported => Err(WaveformError::Unsupported(unsupported)),
    }
}

/// A waveform kind together with its declared coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub kind: WaveformKind,
    pub coefficients: Vec<f64>,
}

impl Waveform {
    #[must_use]
    pub fn new(kind: WaveformKind, coefficients: Vec<f64>) -> Self {
        Self { kind, coefficients }
    }

    /// Evaluate at `elapsed_ms`; see [`evaluate`].
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`evaluate`].
    pub fn evaluate_at(&self, elapsed_ms: f64) -> Result<f64, WaveformError> {
        evaluate(self.kind, &self.coefficients, elapsed_ms)
    }
}
