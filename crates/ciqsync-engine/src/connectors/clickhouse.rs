//! ClickHouse destination count over the HTTP interface.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ciqsync_types::plan::SyncPlan;
use reqwest::Client;

use crate::config::types::ClickHouseConfig;
use crate::validator::DestinationStore;

/// Counts synced rows with a parameterized query. The window bounds are
/// sent as `param_since`/`param_until`, so the query references them as
/// `{since:DateTime64(3)}` and `{until:DateTime64(3)}`.
#[derive(Debug, Clone)]
pub struct ClickHouseDestination {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseDestination {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ClickHouseConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build ClickHouse HTTP client")?;
        Ok(Self { client, config })
    }

    async fn execute(&self, query: &str, params: &[(&str, String)]) -> Result<String> {
        let mut request = self
            .client
            .post(&self.config.url)
            .query(&[("database", self.config.database.as_str())])
            .header("X-ClickHouse-User", &self.config.user)
            .body(query.to_string());
        if !self.config.password.is_empty() {
            request = request.header("X-ClickHouse-Key", &self.config.password);
        }
        for (name, value) in params {
            request = request.query(&[(format!("param_{name}"), value)]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("ClickHouse request to {} failed", self.config.url))?;
        let status = response.status();
        let body = response.text().await.context("Failed to read ClickHouse response")?;
        if !status.is_success() {
            anyhow::bail!("ClickHouse returned {status}: {}", body.trim());
        }
        Ok(body)
    }
}

/// `DateTime64(3)` literal in UTC.
pub(crate) fn format_datetime64(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub(crate) fn parse_count(body: &str) -> Result<u64> {
    let trimmed = body.trim();
    trimmed
        .parse::<u64>()
        .with_context(|| format!("Unexpected ClickHouse count response '{trimmed}'"))
}

#[async_trait]
impl DestinationStore for ClickHouseDestination {
    async fn count_synced(&self, plan: &SyncPlan, until: DateTime<Utc>) -> Result<u64> {
        let params = [
            ("since", format_datetime64(plan.since)),
            ("until", format_datetime64(until)),
        ];
        let body = self.execute(&self.config.count_query, &params).await?;
        parse_count(&body)
    }

    async fn ping(&self) -> Result<()> {
        let body = self.execute("SELECT 1", &[]).await?;
        parse_count(&body).map(|_| ())
    }
}
