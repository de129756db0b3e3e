//! Sync planning: a pure function from change summary to mover parameters.

use ciqsync_types::change::ChangeSummary;
use ciqsync_types::plan::SyncPlan;

/// Decide whether downstream work runs for this summary.
///
/// With no new data the plan is a no-op and every later stage takes the
/// skip path without touching the destination. Otherwise `since` is the
/// window's reference time, not the latest observed record.
#[must_use]
pub fn plan(summary: &ChangeSummary) -> SyncPlan {
    let since = summary.window().reference_time();
    if !summary.has_new_data() {
        return SyncPlan::noop(since);
    }
    SyncPlan {
        should_run: true,
        since,
        affected_entity_count: summary.affected_entity_count(),
        expected_count: summary.new_record_count(),
    }
}
