//! Result of the change-detection query.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ModelError;
use crate::window::SyncWindow;

/// Volume and time bounds of source records that changed inside a window.
///
/// Only constructible through [`ChangeSummary::new`], so
/// `has_new_data == (new_record_count > 0)` and the bound invariants hold
/// for every value in circulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    window: SyncWindow,
    new_record_count: u64,
    affected_entity_count: u64,
    earliest_record_time: Option<DateTime<Utc>>,
    latest_record_time: Option<DateTime<Utc>>,
    has_new_data: bool,
}

impl ChangeSummary {
    /// Assemble a summary from raw aggregate values.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InconsistentBounds`] when only one of the
    /// record times is present, when `earliest > latest`, or when bounds
    /// are reported for an empty change set.
    pub fn new(
        window: SyncWindow,
        new_record_count: u64,
        affected_entity_count: u64,
        earliest_record_time: Option<DateTime<Utc>>,
        latest_record_time: Option<DateTime<Utc>>,
    ) -> Result<Self, ModelError> {
        match (earliest_record_time, latest_record_time) {
            (Some(earliest), Some(latest)) if earliest > latest => {
                return Err(ModelError::InconsistentBounds {
                    reason: format!(
                        "earliest {} is after latest {}",
                        earliest.to_rfc3339(),
                        latest.to_rfc3339()
                    ),
                });
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ModelError::InconsistentBounds {
                    reason: "only one of earliest/latest record time is present".to_string(),
                });
            }
            (Some(_), Some(_)) if new_record_count == 0 => {
                return Err(ModelError::InconsistentBounds {
                    reason: "record times reported for an empty change set".to_string(),
                });
            }
            _ => {}
        }

        Ok(Self {
            window,
            new_record_count,
            affected_entity_count,
            earliest_record_time,
            latest_record_time,
            has_new_data: new_record_count > 0,
        })
    }

    #[must_use]
    pub fn window(&self) -> &SyncWindow {
        &self.window
    }

    #[must_use]
    pub fn new_record_count(&self) -> u64 {
        self.new_record_count
    }

    #[must_use]
    pub fn affected_entity_count(&self) -> u64 {
        self.affected_entity_count
    }

    #[must_use]
    pub fn earliest_record_time(&self) -> Option<DateTime<Utc>> {
        self.earliest_record_time
    }

    #[must_use]
    pub fn latest_record_time(&self) -> Option<DateTime<Utc>> {
        self.latest_record_time
    }

    #[must_use]
    pub fn has_new_data(&self) -> bool {
        self.has_new_data
    }
}
