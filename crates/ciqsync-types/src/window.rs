//! The half-open time interval that defines "new" records for a run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ModelError;

/// Interval `(reference_time, now]`.
///
/// `reference_time` is the watermark left by the previous run; records
/// created or updated strictly after it and at or before `now` are new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
    reference_time: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl SyncWindow {
    /// Build a window, rejecting empty or inverted intervals.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidWindow`] unless `reference_time < now`.
    pub fn new(reference_time: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self, ModelError> {
        if reference_time >= now {
            return Err(ModelError::InvalidWindow {
                reference_time,
                now,
            });
        }
        Ok(Self {
            reference_time,
            now,
        })
    }

    #[must_use]
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
