//! Bulk mover seam and the stdout report protocol movers use to hand
//! counts back to the run.

use async_trait::async_trait;
use ciqsync_types::plan::SyncPlan;
use serde::{Deserialize, Serialize};

/// Stdout line prefix carrying a JSON [`MoveReport`].
pub const MOVE_REPORT_MARKER: &str = "@@MOVE_REPORT@@";

/// Counts a mover step reports about its own work.
///
/// These feed the run metrics only; the quality gate counts the
/// destination independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveReport {
    pub extracted: u64,
    pub transformed: u64,
    pub loaded: u64,
    pub bytes: u64,
    /// Rows the step saw at the source. Can raise the quality gate's
    /// expectation above the detector count, never lower it.
    pub expected: Option<u64>,
}

/// One step of downstream bulk work.
#[async_trait]
pub trait BulkMover: Send + Sync {
    fn name(&self) -> &str;

    /// Run the step for `plan`. `Ok(None)` when the step reports nothing.
    async fn run(&self, plan: &SyncPlan) -> anyhow::Result<Option<MoveReport>>;
}

/// Extract the last report line from mover stdout.
///
/// Lines that carry the marker but fail to parse are logged and skipped.
#[must_use]
pub fn parse_move_report(stdout: &str) -> Option<MoveReport> {
    let mut report = None;
    for line in stdout.lines() {
        let Some(json) = line.trim().strip_prefix(MOVE_REPORT_MARKER) else {
            continue;
        };
        match serde_json::from_str::<MoveReport>(json) {
            Ok(parsed) => report = Some(parsed),
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed move report"),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report_among_other_output() {
        let stdout = "starting\n\
                      @@MOVE_REPORT@@{\"extracted\":42,\"transformed\":42,\"loaded\":40,\"bytes\":2048}\n\
                      done\n";
        let report = parse_move_report(stdout).unwrap();
        assert_eq!(report.extracted, 42);
        assert_eq!(report.loaded, 40);
        assert_eq!(report.bytes, 2048);
        assert_eq!(report.expected, None);
    }

    #[test]
    fn test_last_report_wins() {
        let stdout = "@@MOVE_REPORT@@{\"loaded\":1}\n@@MOVE_REPORT@@{\"loaded\":2,\"expected\":5}\n";
        let report = parse_move_report(stdout).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.expected, Some(5));
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let report = parse_move_report("@@MOVE_REPORT@@{}").unwrap();
        assert_eq!(report, MoveReport::default());
    }

    #[test]
    fn test_no_or_malformed_report() {
        assert_eq!(parse_move_report("plain output\n"), None);
        assert_eq!(parse_move_report("@@MOVE_REPORT@@{not json"), None);
    }
}
