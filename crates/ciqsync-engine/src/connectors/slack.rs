//! Slack incoming-webhook alert channel.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ciqsync_types::alert::AlertPayload;
use reqwest::Client;
use serde::Serialize;

use crate::alert::AlertChannel;
use crate::config::types::SlackConfig;

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct SlackChannel {
    client: Client,
    config: SlackConfig,
}

impl SlackChannel {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SlackConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build Slack HTTP client")?;
        Ok(Self { client, config })
    }

    fn message<'a>(&'a self, payload: &AlertPayload) -> Result<WebhookMessage<'a>> {
        Ok(WebhookMessage {
            text: render_text(payload)?,
            channel: self.config.channel.as_deref(),
            username: &self.config.username,
            icon_emoji: self.config.icon_emoji.as_deref(),
        })
    }
}

/// Header line, body, then the structured context as a JSON code block.
pub(crate) fn render_text(payload: &AlertPayload) -> Result<String> {
    let context = serde_json::to_string_pretty(&payload.structured_context)
        .context("Failed to render alert context")?;
    Ok(format!(
        "{} *{}* - {}\n{}\n```{}```",
        payload.status.emoji(),
        payload.title,
        payload.status.as_str().to_uppercase(),
        payload.body,
        context
    ))
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn deliver(&self, payload: &AlertPayload) -> Result<()> {
        let message = self.message(payload)?;
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&message)
            .send()
            .await
            .context("Slack webhook request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack webhook returned {status}: {}", body.trim());
        }
        Ok(())
    }
}
