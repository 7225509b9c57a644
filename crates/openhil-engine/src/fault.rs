//! Monitoring faults.

use std::fmt;

/// One tolerance violation observed by the monitor.
///
/// Faults are records, not errors: they accumulate into the step and run
/// verdict and never abort a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    /// Fully-qualified signal name.
    pub signal: String,
    pub expected: f64,
    /// Declared tolerance of the matched range.
    pub tolerance: f64,
    pub measured: f64,
    /// Index of the matched monitored range, in declared order.
    pub range_index: usize,
    /// Elapsed time since the owning step began.
    pub elapsed_ms: f64,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ERROR - the signal {} is out of the expected range {} \u{b1} {}%; \
             measured value: {}; range index: {}; time from start: {}",
            self.signal,
            self.expected,
            self.tolerance,
            self.measured,
            self.range_index,
            self.elapsed_ms
        )
    }
}
