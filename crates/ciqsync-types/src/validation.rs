//! Outcome of the destination quality gate.

use serde::{Deserialize, Serialize};

/// Expected vs. independently observed destination volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub expected_count: u64,
    pub observed_count: u64,
    /// `observed / max(expected, 1)`, `1.0` for an empty expectation,
    /// never above `1.0`.
    pub success_rate: f64,
    pub threshold: f64,
    pub passed: bool,
}

impl ValidationResult {
    /// Rows the destination is missing relative to the expectation.
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.expected_count.saturating_sub(self.observed_count)
    }
}
