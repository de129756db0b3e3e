//! PostgreSQL source aggregate and destination count.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ciqsync_types::plan::SyncPlan;
use ciqsync_types::window::SyncWindow;
use tokio_postgres::{Client, Config as PgConfig, NoTls};

use crate::config::types::PostgresConnection;
use crate::detector::{SourceAggregate, SourceStore};
use crate::validator::DestinationStore;

/// CIQ change aggregate. A session counts as changed when it, or its
/// metrics row, was created or updated inside the window.
pub const DEFAULT_CHANGE_QUERY: &str = "\
SELECT
    COUNT(*)::bigint AS new_records,
    COUNT(DISTINCT s.teacher_id)::bigint AS affected_entities,
    MIN(s.recorded_at)::timestamptz AS earliest_record_time,
    MAX(s.recorded_at)::timestamptz AS latest_record_time
FROM audio.audio_sessions s
JOIN analytics.ciq_metrics m ON s.id = m.session_id
WHERE s.status = 'completed'
  AND ((s.created_at > $1::timestamptz AND s.created_at <= $2::timestamptz)
    OR (m.created_at > $1::timestamptz AND m.created_at <= $2::timestamptz)
    OR (m.updated_at > $1::timestamptz AND m.updated_at <= $2::timestamptz))";

/// Connect to PostgreSQL and drive the connection on a background task.
pub(crate) async fn connect(conn: &PostgresConnection) -> Result<Client> {
    let mut pg = PgConfig::new();
    pg.host(&conn.host);
    pg.port(conn.port);
    pg.user(&conn.user);
    if !conn.password.is_empty() {
        pg.password(&conn.password);
    }
    pg.dbname(&conn.database);
    pg.connect_timeout(Duration::from_secs(conn.connect_timeout_seconds));
    pg.application_name("ciqsync");

    let (client, connection) = pg.connect(NoTls).await.with_context(|| {
        format!(
            "Connection to {}:{}/{} failed",
            conn.host, conn.port, conn.database
        )
    })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "PostgreSQL connection error");
        }
    });

    Ok(client)
}

async fn ping(conn: &PostgresConnection) -> Result<()> {
    let client = connect(conn).await?;
    client
        .query_one("SELECT 1", &[])
        .await
        .context("Connection test failed")?;
    Ok(())
}

/// Operational store queried for new or updated records.
#[derive(Debug, Clone)]
pub struct PostgresSource {
    connection: PostgresConnection,
    query: String,
}

impl PostgresSource {
    /// Source with [`DEFAULT_CHANGE_QUERY`] unless `query` overrides it.
    ///
    /// An override must return `(bigint, bigint, timestamptz, timestamptz)`
    /// and bind `$1`/`$2` to the window bounds.
    #[must_use]
    pub fn new(connection: PostgresConnection, query: Option<String>) -> Self {
        Self {
            connection,
            query: query.unwrap_or_else(|| DEFAULT_CHANGE_QUERY.to_string()),
        }
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }
}

#[async_trait]
impl SourceStore for PostgresSource {
    async fn aggregate_changes(&self, window: &SyncWindow) -> Result<SourceAggregate> {
        let client = connect(&self.connection).await?;
        let since = window.reference_time();
        let until = window.now();
        let row = client
            .query_one(self.query.as_str(), &[&since, &until])
            .await
            .context("Change aggregate query failed")?;

        Ok(SourceAggregate {
            new_records: row.try_get(0).context("new_records column")?,
            affected_entities: row.try_get(1).context("affected_entities column")?,
            earliest: row
                .try_get::<_, Option<DateTime<Utc>>>(2)
                .context("earliest_record_time column")?,
            latest: row
                .try_get::<_, Option<DateTime<Utc>>>(3)
                .context("latest_record_time column")?,
        })
    }

    async fn ping(&self) -> Result<()> {
        ping(&self.connection).await
    }
}

/// PostgreSQL analytical store counted by the quality gate.
#[derive(Debug, Clone)]
pub struct PostgresDestination {
    connection: PostgresConnection,
    count_query: String,
}

impl PostgresDestination {
    #[must_use]
    pub fn new(connection: PostgresConnection, count_query: impl Into<String>) -> Self {
        Self {
            connection,
            count_query: count_query.into(),
        }
    }
}

#[async_trait]
impl DestinationStore for PostgresDestination {
    async fn count_synced(&self, plan: &SyncPlan, until: DateTime<Utc>) -> Result<u64> {
        let client = connect(&self.connection).await?;
        let row = client
            .query_one(self.count_query.as_str(), &[&plan.since, &until])
            .await
            .context("Destination count query failed")?;
        let count: i64 = row.try_get(0).context("count column")?;
        u64::try_from(count).with_context(|| format!("negative destination count {count}"))
    }

    async fn ping(&self) -> Result<()> {
        ping(&self.connection).await
    }
}
