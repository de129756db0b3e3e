//! Read-only snapshot of a run's metrics and its human-readable rendering.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Errors kept in a snapshot; the recorder itself keeps all of them.
pub const MAX_REPORTED_ERRORS: usize = 10;

/// Snapshot produced by the run metrics recorder at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub extracted: u64,
    pub transformed: u64,
    pub loaded: u64,
    pub failed: u64,
    pub bytes_processed: u64,
    /// `loaded / max(extracted, 1)`.
    pub success_rate: f64,
    /// Records per second, `loaded / max(duration_secs, 1)`.
    pub throughput: f64,
    pub error_count: usize,
    /// First [`MAX_REPORTED_ERRORS`] errors, in recording order.
    pub errors: Vec<String>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline:      {}", self.pipeline)?;
        writeln!(f, "Started:       {}", self.start_time.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Duration:      {}", format_duration(self.duration_secs))?;
        writeln!(
            f,
            "Records:       {} extracted, {} transformed, {} loaded, {} failed",
            self.extracted, self.transformed, self.loaded, self.failed
        )?;
        writeln!(f, "Bytes:         {}", format_bytes(self.bytes_processed))?;
        writeln!(f, "Success rate:  {:.1}%", self.success_rate * 100.0)?;
        write!(f, "Throughput:    {:.1} records/sec", self.throughput)?;
        if self.error_count > 0 {
            write!(f, "\nErrors ({}):", self.error_count)?;
            for err in &self.errors {
                write!(f, "\n  - {err}")?;
            }
            if self.error_count > self.errors.len() {
                write!(f, "\n  ... {} more", self.error_count - self.errors.len())?;
            }
        }
        Ok(())
    }
}

/// Format a byte count with binary units (`B` through `PB`).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PB")
}

/// Format seconds as `s`, `m` or `h` depending on magnitude.
#[must_use]
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{secs:.2}s")
    } else if secs < 3600.0 {
        format!("{:.2}m", secs / 60.0)
    } else {
        format!("{:.2}h", secs / 3600.0)
    }
}
