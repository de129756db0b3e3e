//! Incremental sync decision-and-validation pipeline.
//!
//! A run threads typed stage outputs explicitly:
//! [`detector::detect`] → [`planner::plan`] → movers →
//! [`validator::QualityGate`] → [`alert::AlertDispatcher`], driven by
//! [`driver::SyncDriver`]. Storage engines, the bulk mover and alert
//! delivery are reached through the traits defined next to the stage that
//! consumes them; concrete adapters live in [`connectors`].

pub mod alert;
pub mod config;
pub mod connectors;
pub mod detector;
pub mod driver;
pub mod errors;
pub mod instrument;
pub mod metrics;
pub mod mover;
pub mod planner;
pub mod resolve;
pub mod validator;

// Re-export public API for convenience
pub use driver::{RunFailure, RunReport, SyncDriver};
pub use errors::{StageFailure, SyncError};
pub use instrument::RunContext;
