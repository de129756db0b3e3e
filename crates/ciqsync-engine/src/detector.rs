//! Change detection: how much source data is new since the reference time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ciqsync_types::change::ChangeSummary;
use ciqsync_types::window::SyncWindow;

use crate::errors::SyncError;

/// Raw row returned by the source aggregate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceAggregate {
    pub new_records: i64,
    pub affected_entities: i64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Read-only access to the operational store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Run the single aggregate query over `(reference_time, now]`.
    ///
    /// Implementations must bind the window bounds as query parameters.
    async fn aggregate_changes(&self, window: &SyncWindow) -> anyhow::Result<SourceAggregate>;

    /// Cheap connectivity check used by `check`.
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Query the source for changes inside `window`.
///
/// # Errors
///
/// [`SyncError::InvalidWindow`] if the reference time lies in the future;
/// [`SyncError::SourceUnavailable`] if the query fails or returns an
/// aggregate that cannot be trusted. A partial summary is never returned.
pub async fn detect(source: &dyn SourceStore, window: &SyncWindow) -> Result<ChangeSummary, SyncError> {
    if window.reference_time() > Utc::now() {
        return Err(SyncError::InvalidWindow(format!(
            "reference time {} is in the future",
            window.reference_time().to_rfc3339()
        )));
    }

    let aggregate = source
        .aggregate_changes(window)
        .await
        .map_err(SyncError::SourceUnavailable)?;

    let summary = summarize(*window, aggregate)?;
    if summary.has_new_data() {
        tracing::info!(
            new_records = summary.new_record_count(),
            affected_entities = summary.affected_entity_count(),
            since = %window.reference_time(),
            "Found new source records"
        );
    } else {
        tracing::info!(since = %window.reference_time(), "No new source records");
    }
    Ok(summary)
}

fn summarize(window: SyncWindow, aggregate: SourceAggregate) -> Result<ChangeSummary, SyncError> {
    let new_records = u64::try_from(aggregate.new_records).map_err(|_| {
        SyncError::SourceUnavailable(anyhow::anyhow!(
            "aggregate returned negative record count {}",
            aggregate.new_records
        ))
    })?;
    let affected = u64::try_from(aggregate.affected_entities).map_err(|_| {
        SyncError::SourceUnavailable(anyhow::anyhow!(
            "aggregate returned negative entity count {}",
            aggregate.affected_entities
        ))
    })?;

    ChangeSummary::new(window, new_records, affected, aggregate.earliest, aggregate.latest)
        .map_err(|e| SyncError::SourceUnavailable(anyhow::Error::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    struct FixedSource(anyhow::Result<SourceAggregate>);

    #[async_trait]
    impl SourceStore for FixedSource {
        async fn aggregate_changes(&self, _window: &SyncWindow) -> anyhow::Result<SourceAggregate> {
            match &self.0 {
                Ok(agg) => Ok(*agg),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    fn last_hour() -> SyncWindow {
        let now = Utc::now();
        SyncWindow::new(now - Duration::hours(1), now).unwrap()
    }

    fn aggregate(count: i64, affected: i64) -> SourceAggregate {
        let now = Utc::now();
        let bounds = (count > 0).then_some(now);
        SourceAggregate {
            new_records: count,
            affected_entities: affected,
            earliest: bounds.map(|t| t - Duration::minutes(30)),
            latest: bounds,
        }
    }

    #[tokio::test]
    async fn test_detect_counts_new_records() {
        let source = FixedSource(Ok(aggregate(42, 7)));
        let summary = detect(&source, &last_hour()).await.unwrap();
        assert!(summary.has_new_data());
        assert_eq!(summary.new_record_count(), 42);
        assert_eq!(summary.affected_entity_count(), 7);
        assert!(summary.earliest_record_time() <= summary.latest_record_time());
    }

    #[tokio::test]
    async fn test_detect_empty_window() {
        let source = FixedSource(Ok(aggregate(0, 0)));
        let summary = detect(&source, &last_hour()).await.unwrap();
        assert!(!summary.has_new_data());
        assert!(summary.latest_record_time().is_none());
    }

    #[tokio::test]
    async fn test_detect_store_error_is_source_unavailable() {
        let source = FixedSource(Err(anyhow::anyhow!("connection refused")));
        let err = detect(&source, &last_hour()).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_detect_negative_count_is_rejected() {
        let source = FixedSource(Ok(aggregate(-1, 0)));
        let err = detect(&source, &last_hour()).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_detect_inconsistent_bounds_never_yield_summary() {
        let mut agg = aggregate(5, 1);
        agg.earliest = None;
        let source = FixedSource(Ok(agg));
        let err = detect(&source, &last_hour()).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_detect_future_reference_time_rejected() {
        let start = Utc::now() + Duration::hours(1);
        let window = SyncWindow::new(start, start + Duration::hours(1)).unwrap();
        let source = FixedSource(Ok(aggregate(1, 1)));
        let err = detect(&source, &window).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidWindow(_)));
    }

    proptest! {
        #[test]
        fn summarize_keeps_has_new_data_consistent(count in 0_i64..1_000_000, affected in 0_i64..1_000) {
            let summary = summarize(last_hour(), aggregate(count, affected)).unwrap();
            prop_assert_eq!(summary.has_new_data(), summary.new_record_count() > 0);
        }
    }
}
