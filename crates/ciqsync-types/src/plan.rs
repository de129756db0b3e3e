//! Decision on whether the downstream sync step runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters handed to the bulk movers.
///
/// `since` is always the window's reference time rather than the latest
/// observed record, so rows committed between detection and the move are
/// picked up by the next run. Loads must therefore be upsert-idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub should_run: bool,
    pub since: DateTime<Utc>,
    pub affected_entity_count: u64,
    /// Source-side volume asserted before the move.
    pub expected_count: u64,
}

impl SyncPlan {
    /// A plan that performs no work.
    #[must_use]
    pub fn noop(since: DateTime<Utc>) -> Self {
        Self {
            should_run: false,
            since,
            affected_entity_count: 0,
            expected_count: 0,
        }
    }
}
