//! Sync error taxonomy and stage-scoped failures.

use ciqsync_state::StateError;
use ciqsync_types::state::Stage;

/// Everything that can go wrong inside a run.
///
/// Infrastructure failures are left to the scheduler's retry policy; the
/// core itself never retries.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The source store could not be reached or queried.
    #[error("source unavailable: {0:#}")]
    SourceUnavailable(anyhow::Error),

    /// The destination count could not be obtained.
    #[error("destination unavailable: {0:#}")]
    DestinationUnavailable(anyhow::Error),

    /// A bulk mover step returned an error.
    #[error("mover step '{step}' failed: {reason:#}")]
    MoverFailed { step: String, reason: anyhow::Error },

    /// Quality threshold outside `[0, 1]`.
    #[error("invalid quality threshold {0}: must be within [0, 1]")]
    InvalidThreshold(f64),

    /// Window bounds rejected before querying the source.
    #[error("invalid sync window: {0}")]
    InvalidWindow(String),

    /// The quality gate tripped and the pipeline is configured to fail on it.
    #[error(
        "quality gate failed: {observed}/{expected} records landed ({:.1}% < {:.1}%)",
        .success_rate * 100.0,
        .threshold * 100.0
    )]
    ValidationFailed {
        expected: u64,
        observed: u64,
        success_rate: f64,
        threshold: f64,
    },

    /// The alert channel rejected or dropped a delivery. Never fatal.
    #[error("alert delivery failed: {0:#}")]
    AlertDeliveryFailed(anyhow::Error),

    #[error("state backend: {0}")]
    State(#[from] StateError),
}

impl SyncError {
    /// Whether a scheduler retry could plausibly succeed.
    ///
    /// Configuration and data-quality failures are never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_)
                | Self::DestinationUnavailable(_)
                | Self::MoverFailed { .. }
                | Self::State(_)
        )
    }

    /// Stable machine-readable kind, used in alert context.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::DestinationUnavailable(_) => "destination_unavailable",
            Self::MoverFailed { .. } => "mover_failed",
            Self::InvalidThreshold(_) => "invalid_threshold",
            Self::InvalidWindow(_) => "invalid_window",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::AlertDeliveryFailed(_) => "alert_delivery_failed",
            Self::State(_) => "state",
        }
    }
}

/// A [`SyncError`] attributed to the stage that raised it.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: SyncError,
}

impl StageFailure {
    #[must_use]
    pub fn new(stage: Stage, error: SyncError) -> Self {
        Self { stage, error }
    }
}
