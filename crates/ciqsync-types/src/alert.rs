//! Alert decisions and the payload handed to alert channels.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal status of a run as seen by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Skip,
    Success,
    Warning,
    Failure,
}

impl AlertStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failure => "failure",
        }
    }

    /// Leading marker used by chat channels.
    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            Self::Skip => "\u{2139}\u{fe0f}",
            Self::Success => "\u{2705}",
            Self::Warning => "\u{26a0}\u{fe0f}",
            Self::Failure => "\u{274c}",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable alert context, ordered for stable rendering.
pub type AlertContext = BTreeMap<String, serde_json::Value>;

/// Whether and what to tell operators about a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDecision {
    pub title: String,
    pub status: AlertStatus,
    pub should_send: bool,
    pub message: String,
    pub structured_context: AlertContext,
}

impl AlertDecision {
    /// The channel payload, or `None` when the alert is suppressed.
    #[must_use]
    pub fn payload(&self) -> Option<AlertPayload> {
        self.should_send.then(|| AlertPayload {
            title: self.title.clone(),
            status: self.status,
            body: self.message.clone(),
            structured_context: self.structured_context.clone(),
        })
    }
}

/// What an alert channel receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub title: String,
    pub status: AlertStatus,
    pub body: String,
    pub structured_context: AlertContext,
}
