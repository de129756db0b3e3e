//! Model construction errors.

use std::fmt;

use chrono::{DateTime, Utc};

/// Rejected attempt to build a model value that would break its invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Window bounds are not strictly increasing.
    InvalidWindow {
        reference_time: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    /// Earliest/latest record times are half-present or out of order.
    InconsistentBounds { reason: String },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWindow {
                reference_time,
                now,
            } => write!(
                f,
                "invalid sync window: reference time {} is not before {}",
                reference_time.to_rfc3339(),
                now.to_rfc3339()
            ),
            Self::InconsistentBounds { reason } => {
                write!(f, "inconsistent change bounds: {reason}")
            }
        }
    }
}

impl std::error::Error for ModelError {}
