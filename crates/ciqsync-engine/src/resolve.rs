//! Wiring from a validated [`PipelineConfig`] to concrete adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use ciqsync_state::{SqliteStateBackend, StateBackend};
use ciqsync_types::state::{CursorState, PipelineId};
use ciqsync_types::window::SyncWindow;

use crate::alert::{AlertChannel, AlertDispatcher, LogChannel};
use crate::config::types::{DestinationConfig, PipelineConfig, StateBackendKind};
use crate::connectors::{
    ClickHouseDestination, CommandMover, PostgresDestination, PostgresSource, SlackChannel,
};
use crate::detector::SourceStore;
use crate::driver::SyncDriver;
use crate::errors::SyncError;
use crate::instrument::{Instrumentation, NoopInstrumentation, TracingMonitor};
use crate::validator::{DestinationStore, QualityGate};

pub fn create_source(config: &PipelineConfig) -> Arc<dyn SourceStore> {
    Arc::new(PostgresSource::new(
        config.source.connection.clone(),
        config.source.query.clone(),
    ))
}

/// # Errors
///
/// Returns an error if the destination client cannot be built.
pub fn create_destination(config: &PipelineConfig) -> Result<Arc<dyn DestinationStore>> {
    Ok(match &config.destination {
        DestinationConfig::Clickhouse(ch) => Arc::new(ClickHouseDestination::new(ch.clone())?),
        DestinationConfig::Postgres(pg) => Arc::new(PostgresDestination::new(
            pg.connection.clone(),
            pg.count_query.clone(),
        )),
    })
}

/// Slack when a webhook is configured, the log otherwise.
///
/// # Errors
///
/// Returns an error if the Slack client cannot be built.
pub fn create_alert_channel(config: &PipelineConfig) -> Result<Arc<dyn AlertChannel>> {
    match &config.alerts.slack {
        Some(slack) if !slack.webhook_url.trim().is_empty() => {
            Ok(Arc::new(SlackChannel::new(slack.clone())?))
        }
        _ => Ok(Arc::new(LogChannel)),
    }
}

fn create_instrumentation(config: &PipelineConfig) -> Arc<dyn Instrumentation> {
    if config.monitoring.enabled {
        Arc::new(TracingMonitor::new(config.monitoring.clone()))
    } else {
        Arc::new(NoopInstrumentation)
    }
}

/// Assemble a [`SyncDriver`] for `config`.
///
/// # Errors
///
/// Returns an error if the quality threshold is invalid or an adapter
/// cannot be built.
pub fn build_driver(config: &PipelineConfig) -> Result<SyncDriver> {
    let gate = QualityGate::new(config.quality.threshold, config.quality.on_failure)?;
    let mut driver = SyncDriver::new(
        create_source(config),
        create_destination(config)?,
        gate,
        AlertDispatcher::new(config.alerts.policy()),
    )
    .with_channel(create_alert_channel(config)?)
    .with_instrumentation(create_instrumentation(config));

    for mover in &config.movers {
        driver = driver.with_mover(Arc::new(CommandMover::from_config(mover)?));
    }
    Ok(driver)
}

/// Default state database location, `~/.ciqsync/state.db`.
#[must_use]
pub fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ciqsync").join("state.db")
}

/// # Errors
///
/// Returns an error if the state database cannot be opened.
pub fn create_state_backend(config: &PipelineConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let path = config
                .state
                .connection
                .as_ref()
                .map_or_else(default_state_path, PathBuf::from);
            let backend = SqliteStateBackend::open(Path::new(&path))
                .with_context(|| format!("Failed to open state DB at {}", path.display()))?;
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

/// Where a run's window starts: an explicit override, else the stored
/// cursor, else `lookback_seconds` before `now`.
#[must_use]
pub fn resolve_reference_time(
    since: Option<DateTime<Utc>>,
    cursor: Option<&CursorState>,
    lookback_seconds: u64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if let Some(since) = since {
        return since;
    }
    if let Some(cursor) = cursor {
        return cursor.reference_time;
    }
    let lookback = i64::try_from(lookback_seconds).unwrap_or(i64::MAX);
    now - Duration::try_seconds(lookback).unwrap_or_else(Duration::zero)
}

/// Read the stored cursor for `pipeline` and build the run's window.
///
/// # Errors
///
/// Returns [`SyncError::State`] if the cursor cannot be read and
/// [`SyncError::InvalidWindow`] if the resolved start is not before `now`.
pub fn resolve_window(
    state: &dyn StateBackend,
    pipeline: &PipelineId,
    since: Option<DateTime<Utc>>,
    lookback_seconds: u64,
    now: DateTime<Utc>,
) -> std::result::Result<SyncWindow, SyncError> {
    let cursor = state.get_cursor(pipeline)?;
    let reference_time = resolve_reference_time(since, cursor.as_ref(), lookback_seconds, now);
    tracing::debug!(
        pipeline = %pipeline,
        since = %reference_time,
        from_cursor = since.is_none() && cursor.is_some(),
        "Resolved sync window"
    );
    SyncWindow::new(reference_time, now).map_err(|e| SyncError::InvalidWindow(e.to_string()))
}

/// Outcome of one connectivity check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub label: String,
    pub outcome: std::result::Result<String, String>,
}

impl CheckResult {
    fn from_result(label: impl Into<String>, result: Result<String>) -> Self {
        Self {
            label: label.into(),
            outcome: result.map_err(|e| format!("{e:#}")),
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Check the source, destination, state backend, mover working
/// directories and alert channel.
pub async fn check_pipeline(config: &PipelineConfig) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let source = create_source(config);
    results.push(CheckResult::from_result(
        "Source (postgres)",
        source.ping().await.map(|()| {
            let conn = &config.source.connection;
            format!("{}:{}/{}", conn.host, conn.port, conn.database)
        }),
    ));

    let destination = match create_destination(config) {
        Ok(destination) => destination.ping().await.map(|()| "reachable".to_string()),
        Err(e) => Err(e),
    };
    results.push(CheckResult::from_result(
        format!("Destination ({})", config.destination.kind()),
        destination,
    ));

    results.push(CheckResult::from_result(
        "State backend",
        create_state_backend(config).map(|_| "opened".to_string()),
    ));

    for mover in &config.movers {
        let outcome = match &mover.working_dir {
            Some(dir) if !dir.is_dir() => Err(anyhow::anyhow!(
                "working_dir {} does not exist",
                dir.display()
            )),
            _ => CommandMover::from_config(mover).map(|_| mover.command.join(" ")),
        };
        results.push(CheckResult::from_result(format!("Mover '{}'", mover.name), outcome));
    }

    results.push(CheckResult::from_result(
        "Alert channel",
        create_alert_channel(config).map(|channel| channel.name().to_string()),
    ));

    results
}
