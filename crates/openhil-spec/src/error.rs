//! Loader error types.

use openhil_signal::WaveformError;
use thiserror::Error;

/// Failures while building a test specification from its record form.
///
/// All of these abort a run before any device interaction.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Malformed specification input.
    #[error("malformed test specification: {0}")]
    Parse(#[from] serde_json::Error),

    /// A referenced signal name is absent from the resolved signal map or
    /// the loaded descriptions.
    #[error("signal {0} is missing from the loaded descriptions")]
    UnresolvedSignal(String),

    /// A step record carries an unknown `type` discriminator.
    #[error("step type {0:?} is not supported")]
    UnsupportedStepType(String),

    /// A special step names an action the format does not declare.
    #[error("unknown special-step action {0:?}")]
    UnknownAction(String),

    /// A special step record without an action name.
    #[error("special step {0:?} declares no step_action")]
    MissingAction(String),

    /// The record supplies no test id. There is no derivation scheme;
    /// callers must provide one.
    #[error("test specification carries no id (xray_id)")]
    MissingTestId,

    /// A declared waveform cannot hold together with its coefficients.
    #[error("signal {signal}: {source}")]
    Waveform {
        signal: String,
        source: WaveformError,
    },
}
