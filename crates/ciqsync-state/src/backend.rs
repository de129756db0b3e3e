//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for the reference cursor
//! and run history. Model types live in [`ciqsync_types::state`].

use chrono::{DateTime, Utc};
use ciqsync_types::state::{CursorState, PipelineId, RunRecord, RunStats, RunStatus};

use crate::error;

/// Storage contract for pipeline state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Read the reference cursor for a pipeline.
    ///
    /// Returns `Ok(None)` when no cursor has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_cursor(&self, pipeline: &PipelineId) -> error::Result<Option<CursorState>>;

    /// Upsert the reference cursor for a pipeline.
    ///
    /// Called by the scheduler side (`ciqsync cursor set`), never from
    /// inside a run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_cursor(&self, pipeline: &PipelineId, reference_time: DateTime<Utc>)
        -> error::Result<()>;

    /// Record the start of a run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId, reference_time: DateTime<Utc>)
        -> error::Result<i64>;

    /// Finalize a run with its terminal status and stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Most recent runs for a pipeline, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn recent_runs(&self, pipeline: &PipelineId, limit: usize) -> error::Result<Vec<RunRecord>>;
}
