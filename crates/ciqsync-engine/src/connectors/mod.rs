//! Concrete adapters for the store, mover and alert seams.

pub mod clickhouse;
pub mod command;
pub mod postgres;
pub mod slack;

pub use clickhouse::ClickHouseDestination;
pub use command::CommandMover;
pub use postgres::{PostgresDestination, PostgresSource};
pub use slack::SlackChannel;
