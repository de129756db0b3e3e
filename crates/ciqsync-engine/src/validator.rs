//! Destination quality gate.
//!
//! The observed count always comes from the destination store itself; a
//! mover's own success report is never trusted here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ciqsync_types::plan::SyncPlan;
use ciqsync_types::validation::ValidationResult;
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Post-load row counts in the analytical store.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Rows that landed for the plan's scope, i.e. source records changed in
    /// `(plan.since, until]`.
    async fn count_synced(&self, plan: &SyncPlan, until: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Cheap connectivity check used by `check`.
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reject thresholds outside `[0, 1]`, NaN included.
///
/// # Errors
///
/// Returns [`SyncError::InvalidThreshold`].
pub fn check_threshold(threshold: f64) -> Result<f64, SyncError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(SyncError::InvalidThreshold(threshold))
    }
}

/// Compare expected and observed volume against `threshold`.
///
/// An empty expectation is vacuously complete (rate `1.0`). Rates above
/// `1.0`, which re-processed boundary rows can produce, are clamped.
///
/// # Errors
///
/// Returns [`SyncError::InvalidThreshold`] if `threshold` is outside `[0, 1]`.
pub fn validate(
    expected_count: u64,
    observed_count: u64,
    threshold: f64,
) -> Result<ValidationResult, SyncError> {
    let threshold = check_threshold(threshold)?;
    #[allow(clippy::cast_precision_loss)]
    let success_rate = if expected_count == 0 {
        1.0
    } else {
        (observed_count as f64 / expected_count as f64).min(1.0)
    };
    Ok(ValidationResult {
        expected_count,
        observed_count,
        success_rate,
        threshold,
        passed: success_rate >= threshold,
    })
}

/// What a tripped gate means for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAction {
    /// Report the run as `warning`.
    #[default]
    Warn,
    /// Raise [`SyncError::ValidationFailed`] and take the failure path.
    Fail,
}

/// Validated threshold plus the policy for a tripped gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    threshold: f64,
    on_failure: QualityAction,
}

impl QualityGate {
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidThreshold`] if `threshold` is outside `[0, 1]`.
    pub fn new(threshold: f64, on_failure: QualityAction) -> Result<Self, SyncError> {
        Ok(Self {
            threshold: check_threshold(threshold)?,
            on_failure,
        })
    }

    /// Count the destination independently and validate against `expected`.
    ///
    /// # Errors
    ///
    /// [`SyncError::DestinationUnavailable`] if the count fails;
    /// [`SyncError::ValidationFailed`] if the gate trips under
    /// [`QualityAction::Fail`].
    pub async fn evaluate(
        &self,
        destination: &dyn DestinationStore,
        plan: &SyncPlan,
        expected: u64,
        until: DateTime<Utc>,
    ) -> Result<ValidationResult, SyncError> {
        let observed = destination
            .count_synced(plan, until)
            .await
            .map_err(SyncError::DestinationUnavailable)?;
        let result = validate(expected, observed, self.threshold)?;

        if result.passed {
            tracing::info!(
                expected = result.expected_count,
                observed = result.observed_count,
                success_rate = result.success_rate,
                "Sync validation passed"
            );
        } else {
            tracing::warn!(
                expected = result.expected_count,
                observed = result.observed_count,
                success_rate = result.success_rate,
                threshold = self.threshold,
                "Sync validation below threshold"
            );
            if self.on_failure == QualityAction::Fail {
                return Err(SyncError::ValidationFailed {
                    expected: result.expected_count,
                    observed: result.observed_count,
                    success_rate: result.success_rate,
                    threshold: self.threshold,
                });
            }
        }
        Ok(result)
    }
}
