//! Shared data model for the ciqsync incremental sync pipeline.
//!
//! Every stage of a run consumes the previous stage's output type from
//! this crate: [`window::SyncWindow`] → [`change::ChangeSummary`] →
//! [`plan::SyncPlan`] → [`validation::ValidationResult`] →
//! [`alert::AlertDecision`]. Kept free of I/O so the state, engine and
//! CLI crates can share it without circular dependencies.

pub mod alert;
pub mod change;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod state;
pub mod validation;
pub mod window;
