//! Pipeline state persistence for ciqsync.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for the per-pipeline reference cursor and run history.
//! The sync core only reads the cursor; it is advanced by whatever
//! schedules the pipeline.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
