//! Serde types for the pipeline YAML.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::alert::{AlertPolicy, DEFAULT_ALERT_TITLE, DEFAULT_SIGNIFICANT_VOLUME};
use crate::instrument::MonitoringConfig;
use crate::validator::QualityAction;

/// Top-level pipeline configuration parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub movers: Vec<MoverConfig>,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Connection parameters for a PostgreSQL store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConnection {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub connection: PostgresConnection,
    /// Aggregate query override; `$1`/`$2` bind the window bounds.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationConfig {
    Clickhouse(ClickHouseConfig),
    Postgres(PostgresDestinationConfig),
}

impl DestinationConfig {
    #[must_use]
    pub fn count_query(&self) -> &str {
        match self {
            Self::Clickhouse(c) => &c.count_query,
            Self::Postgres(c) => &c.count_query,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Clickhouse(_) => "clickhouse",
            Self::Postgres(_) => "postgres",
        }
    }
}

/// ClickHouse HTTP interface. `count_query` takes `{since:DateTime64(3)}`
/// and `{until:DateTime64(3)}` server-side parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    pub url: String,
    #[serde(default = "default_ch_database")]
    pub database: String,
    #[serde(default = "default_ch_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub count_query: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

fn default_ch_database() -> String {
    "default".into()
}

fn default_ch_user() -> String {
    "default".into()
}

fn default_http_timeout() -> u64 {
    30
}

/// PostgreSQL destination. `count_query` binds `$1` (since) and `$2` (until).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresDestinationConfig {
    pub connection: PostgresConnection,
    pub count_query: String,
}

// ---------------------------------------------------------------------------
// Movers
// ---------------------------------------------------------------------------

/// One external bulk mover step. Arguments may use `{since}` and
/// `{affected_entity_count}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoverConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Quality, alerts, schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub on_failure: QualityAction,
}

fn default_threshold() -> f64 {
    0.95
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            on_failure: QualityAction::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_alert_title")]
    pub title: String,
    #[serde(default = "default_significant_volume")]
    pub significant_volume: u64,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

fn default_alert_title() -> String {
    DEFAULT_ALERT_TITLE.into()
}

fn default_significant_volume() -> u64 {
    DEFAULT_SIGNIFICANT_VOLUME
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            title: default_alert_title(),
            significant_volume: default_significant_volume(),
            slack: None,
        }
    }
}

impl AlertsConfig {
    #[must_use]
    pub fn policy(&self) -> AlertPolicy {
        AlertPolicy {
            title: self.title.clone(),
            significant_volume: self.significant_volume,
        }
    }
}

/// Slack incoming webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_slack_username")]
    pub username: String,
    #[serde(default)]
    pub icon_emoji: Option<String>,
    #[serde(default = "default_slack_timeout")]
    pub timeout_seconds: u64,
}

fn default_slack_username() -> String {
    "ciqsync".into()
}

fn default_slack_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Fallback window length when no cursor is stored.
    #[serde(default = "default_lookback")]
    pub lookback_seconds: u64,
}

fn default_lookback() -> u64 {
    3600
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lookback_seconds: default_lookback(),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database path; defaults to `~/.ciqsync/state.db`.
    #[serde(default)]
    pub connection: Option<String>,
}
