//! Per-run metrics recorder.
//!
//! One recorder per run, appended to synchronously by the stages in order,
//! so no internal locking.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ciqsync_types::metrics::{RunSummary, MAX_REPORTED_ERRORS};

#[derive(Debug)]
pub struct RunMetrics {
    pipeline: String,
    start_time: DateTime<Utc>,
    started: Instant,
    extracted: u64,
    transformed: u64,
    loaded: u64,
    failed: u64,
    bytes_processed: u64,
    errors: Vec<String>,
}

impl RunMetrics {
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            start_time: Utc::now(),
            started: Instant::now(),
            extracted: 0,
            transformed: 0,
            loaded: 0,
            failed: 0,
            bytes_processed: 0,
            errors: Vec::new(),
        }
    }

    pub fn record_extracted(&mut self, count: u64) {
        self.extracted = self.extracted.saturating_add(count);
    }

    pub fn record_transformed(&mut self, count: u64) {
        self.transformed = self.transformed.saturating_add(count);
    }

    pub fn record_loaded(&mut self, count: u64, bytes: u64) {
        self.loaded = self.loaded.saturating_add(count);
        self.bytes_processed = self.bytes_processed.saturating_add(bytes);
    }

    /// Append an error and count it as a failed record.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.failed = self.failed.saturating_add(1);
        self.errors.push(message.into());
    }

    /// Every recorded error, uncapped.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Read-only snapshot as of now.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.summarize(self.started.elapsed())
    }

    #[allow(clippy::cast_precision_loss)]
    fn summarize(&self, elapsed: Duration) -> RunSummary {
        let duration_secs = elapsed.as_secs_f64();
        let end_time = self.start_time
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        RunSummary {
            pipeline: self.pipeline.clone(),
            start_time: self.start_time,
            end_time,
            duration_secs,
            extracted: self.extracted,
            transformed: self.transformed,
            loaded: self.loaded,
            failed: self.failed,
            bytes_processed: self.bytes_processed,
            success_rate: self.loaded as f64 / self.extracted.max(1) as f64,
            throughput: self.loaded as f64 / duration_secs.max(1.0),
            error_count: self.errors.len(),
            errors: self.errors.iter().take(MAX_REPORTED_ERRORS).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate_across_steps() {
        let mut m = RunMetrics::new("ciq_sync");
        m.record_extracted(30);
        m.record_extracted(12);
        m.record_transformed(42);
        m.record_loaded(20, 1000);
        m.record_loaded(20, 500);
        let s = m.summarize(Duration::from_secs(4));
        assert_eq!(s.extracted, 42);
        assert_eq!(s.transformed, 42);
        assert_eq!(s.loaded, 40);
        assert_eq!(s.bytes_processed, 1500);
        assert!((s.success_rate - 40.0 / 42.0).abs() < 1e-12);
        assert!((s.throughput - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_run_rates() {
        let m = RunMetrics::new("ciq_sync");
        let s = m.summarize(Duration::from_millis(200));
        assert!(s.success_rate.abs() < f64::EPSILON);
        // Sub-second runs divide by one second.
        assert!(s.throughput.abs() < f64::EPSILON);
        assert_eq!(s.error_count, 0);
    }

    #[test]
    fn test_errors_capped_in_snapshot_only() {
        let mut m = RunMetrics::new("ciq_sync");
        for i in 0..15 {
            m.record_error(format!("error {i}"));
        }
        assert_eq!(m.errors().len(), 15);
        let s = m.summarize(Duration::from_secs(1));
        assert_eq!(s.error_count, 15);
        assert_eq!(s.failed, 15);
        assert_eq!(s.errors.len(), MAX_REPORTED_ERRORS);
        assert_eq!(s.errors[0], "error 0");
    }

    #[test]
    fn test_end_time_follows_duration() {
        let m = RunMetrics::new("ciq_sync");
        let s = m.summarize(Duration::from_secs(90));
        assert_eq!(s.end_time - s.start_time, chrono::Duration::seconds(90));
        assert!(s.to_string().contains("1.50m"));
    }
}
