//! Alert decisions and best-effort delivery.
//!
//! [`AlertDispatcher`] is pure: it turns stage outputs into exactly one
//! [`AlertDecision`] per run. Delivery goes through an [`AlertChannel`]
//! and never fails the run.

use async_trait::async_trait;
use ciqsync_types::alert::{AlertContext, AlertDecision, AlertPayload, AlertStatus};
use ciqsync_types::metrics::{format_duration, RunSummary};
use ciqsync_types::plan::SyncPlan;
use ciqsync_types::validation::ValidationResult;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{StageFailure, SyncError};
use crate::instrument::RunContext;

pub const DEFAULT_ALERT_TITLE: &str = "CIQ Hourly Sync";
pub const DEFAULT_SIGNIFICANT_VOLUME: u64 = 5;

/// Operator-facing alert policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPolicy {
    pub title: String,
    /// Runs moving fewer records than this are not announced when healthy.
    pub significant_volume: u64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            title: DEFAULT_ALERT_TITLE.to_string(),
            significant_volume: DEFAULT_SIGNIFICANT_VOLUME,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertDispatcher {
    policy: AlertPolicy,
}

impl AlertDispatcher {
    #[must_use]
    pub fn new(policy: AlertPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Decide the alert for a run where no stage raised.
    #[must_use]
    pub fn decide(
        &self,
        ctx: &RunContext,
        plan: &SyncPlan,
        validation: Option<&ValidationResult>,
        metrics: &RunSummary,
    ) -> AlertDecision {
        let mut context = base_context(ctx, metrics);
        context.insert("since".into(), json!(plan.since.to_rfc3339()));
        context.insert(
            "affected_entities".into(),
            json!(plan.affected_entity_count),
        );

        if !plan.should_run {
            return self.decision(
                AlertStatus::Skip,
                false,
                format!("No new data since {}", plan.since.to_rfc3339()),
                context,
            );
        }

        let Some(validation) = validation else {
            return self.decision(
                AlertStatus::Warning,
                true,
                "Sync ran but produced no validation result".to_string(),
                context,
            );
        };

        context.insert("expected_count".into(), json!(validation.expected_count));
        context.insert("observed_count".into(), json!(validation.observed_count));
        context.insert("success_rate".into(), json!(validation.success_rate));
        context.insert("threshold".into(), json!(validation.threshold));

        if !validation.passed {
            return self.decision(
                AlertStatus::Warning,
                true,
                format!(
                    "Quality gate below threshold: {}/{} records landed ({:.1}% < {:.1}%), {} missing",
                    validation.observed_count,
                    validation.expected_count,
                    validation.success_rate * 100.0,
                    validation.threshold * 100.0,
                    validation.missing(),
                ),
                context,
            );
        }

        if validation.observed_count < self.policy.significant_volume {
            return self.decision(
                AlertStatus::Warning,
                false,
                format!(
                    "Low volume: {} records synced (below {})",
                    validation.observed_count, self.policy.significant_volume
                ),
                context,
            );
        }

        self.decision(
            AlertStatus::Success,
            true,
            format!(
                "Synced {} records for {} affected entities in {}, success rate {:.1}%",
                validation.observed_count,
                plan.affected_entity_count,
                format_duration(metrics.duration_secs),
                validation.success_rate * 100.0,
            ),
            context,
        )
    }

    /// Decide the alert for a run where a stage raised. Always sent.
    #[must_use]
    pub fn decide_failure(
        &self,
        ctx: &RunContext,
        failure: &StageFailure,
        metrics: &RunSummary,
    ) -> AlertDecision {
        let mut context = base_context(ctx, metrics);
        context.insert("stage".into(), json!(failure.stage.as_str()));
        context.insert("error_kind".into(), json!(failure.error.kind()));
        context.insert("retryable".into(), json!(failure.error.is_retryable()));
        if let SyncError::ValidationFailed {
            expected,
            observed,
            success_rate,
            threshold,
        } = &failure.error
        {
            context.insert("expected_count".into(), json!(expected));
            context.insert("observed_count".into(), json!(observed));
            context.insert("success_rate".into(), json!(success_rate));
            context.insert("threshold".into(), json!(threshold));
        }
        self.decision(AlertStatus::Failure, true, failure.to_string(), context)
    }

    fn decision(
        &self,
        status: AlertStatus,
        should_send: bool,
        message: String,
        mut structured_context: AlertContext,
    ) -> AlertDecision {
        structured_context.insert("status".into(), json!(status.as_str()));
        AlertDecision {
            title: self.policy.title.clone(),
            status,
            should_send,
            message,
            structured_context,
        }
    }
}

fn base_context(ctx: &RunContext, metrics: &RunSummary) -> AlertContext {
    let mut context = AlertContext::new();
    context.insert("pipeline".into(), json!(ctx.pipeline.as_str()));
    context.insert("run_id".into(), json!(ctx.run_id));
    context.insert("duration_seconds".into(), json!(metrics.duration_secs));
    context.insert("records_loaded".into(), json!(metrics.loaded));
    context.insert("bytes".into(), json!(metrics.bytes_processed));
    if metrics.error_count > 0 {
        context.insert("error_count".into(), json!(metrics.error_count));
        context.insert("errors".into(), json!(metrics.errors));
    }
    context
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Where alert payloads go.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, payload: &AlertPayload) -> anyhow::Result<()>;
}

/// Writes alerts to the log. Used when no chat webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, payload: &AlertPayload) -> anyhow::Result<()> {
        let context = serde_json::to_string(&payload.structured_context)?;
        match payload.status {
            AlertStatus::Failure => {
                tracing::error!(title = %payload.title, context = %context, "{}", payload.body);
            }
            AlertStatus::Warning => {
                tracing::warn!(title = %payload.title, context = %context, "{}", payload.body);
            }
            AlertStatus::Skip | AlertStatus::Success => {
                tracing::info!(title = %payload.title, context = %context, "{}", payload.body);
            }
        }
        Ok(())
    }
}

/// Deliver a decision if it should be sent. Returns whether a payload was
/// accepted by the channel. Delivery errors are logged, never raised and
/// never retried.
pub async fn dispatch(channel: &dyn AlertChannel, decision: &AlertDecision) -> bool {
    let Some(payload) = decision.payload() else {
        tracing::debug!(status = %decision.status, "Alert suppressed");
        return false;
    };
    match channel.deliver(&payload).await {
        Ok(()) => {
            tracing::info!(channel = channel.name(), status = %decision.status, "Alert delivered");
            true
        }
        Err(e) => {
            let err = SyncError::AlertDeliveryFailed(e);
            tracing::warn!(channel = channel.name(), error = %err, "Alert not delivered");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Duration, Utc};
    use ciqsync_types::state::Stage;

    use super::*;
    use crate::validator::validate;

    fn ctx() -> RunContext {
        RunContext::new("ciq_sync", "run-1")
    }

    fn summary(loaded: u64) -> RunSummary {
        let now = Utc::now();
        RunSummary {
            pipeline: "ciq_sync".into(),
            start_time: now,
            end_time: now,
            duration_secs: 12.0,
            extracted: loaded,
            transformed: loaded,
            loaded,
            failed: 0,
            bytes_processed: 0,
            success_rate: 1.0,
            throughput: 0.0,
            error_count: 0,
            errors: vec![],
        }
    }

    fn plan(should_run: bool, expected: u64) -> SyncPlan {
        SyncPlan {
            should_run,
            since: Utc::now() - Duration::hours(1),
            affected_entity_count: 7,
            expected_count: expected,
        }
    }

    #[test]
    fn test_skip_is_not_sent() {
        let d = AlertDispatcher::default().decide(&ctx(), &plan(false, 0), None, &summary(0));
        assert_eq!(d.status, AlertStatus::Skip);
        assert!(!d.should_send);
        assert!(d.message.starts_with("No new data since"));
    }

    #[test]
    fn test_success_above_floor() {
        let v = validate(42, 42, 0.95).unwrap();
        let d = AlertDispatcher::default().decide(&ctx(), &plan(true, 42), Some(&v), &summary(42));
        assert_eq!(d.status, AlertStatus::Success);
        assert!(d.should_send);
        assert!(d.message.contains("42 records"));
        assert!(d.message.contains("7 affected entities"));
        assert!(d.message.contains("12.00s"));
        assert!(d.message.contains("100.0%"));
        assert_eq!(d.structured_context["observed_count"], json!(42));
        assert_eq!(d.structured_context["status"], json!("success"));
    }

    #[test]
    fn test_below_threshold_is_sent_warning() {
        let v = validate(42, 39, 0.95).unwrap();
        let d = AlertDispatcher::default().decide(&ctx(), &plan(true, 42), Some(&v), &summary(39));
        assert_eq!(d.status, AlertStatus::Warning);
        assert!(d.should_send);
        assert!(d.message.contains("39/42"));
        assert!(d.message.contains("3 missing"));
    }

    #[test]
    fn test_low_volume_is_suppressed_warning() {
        let v = validate(3, 3, 0.95).unwrap();
        let d = AlertDispatcher::default().decide(&ctx(), &plan(true, 3), Some(&v), &summary(3));
        assert_eq!(d.status, AlertStatus::Warning);
        assert!(!d.should_send);
        assert!(d.payload().is_none());
    }

    #[test]
    fn test_floor_is_configurable() {
        let dispatcher = AlertDispatcher::new(AlertPolicy {
            title: "t".into(),
            significant_volume: 1,
        });
        let v = validate(3, 3, 0.95).unwrap();
        let d = dispatcher.decide(&ctx(), &plan(true, 3), Some(&v), &summary(3));
        assert_eq!(d.status, AlertStatus::Success);
        assert_eq!(d.title, "t");
    }

    #[test]
    fn test_missing_validation_is_sent_warning() {
        let d = AlertDispatcher::default().decide(&ctx(), &plan(true, 10), None, &summary(10));
        assert_eq!(d.status, AlertStatus::Warning);
        assert!(d.should_send);
    }

    #[test]
    fn test_failure_carries_stage_and_error() {
        let failure = StageFailure::new(
            Stage::Detect,
            SyncError::SourceUnavailable(anyhow::anyhow!("connection refused")),
        );
        let d = AlertDispatcher::default().decide_failure(&ctx(), &failure, &summary(0));
        assert_eq!(d.status, AlertStatus::Failure);
        assert!(d.should_send);
        assert_eq!(
            d.message,
            "detect stage failed: source unavailable: connection refused"
        );
        assert_eq!(d.structured_context["stage"], json!("detect"));
        assert_eq!(d.structured_context["error_kind"], json!("source_unavailable"));
        assert_eq!(d.structured_context["retryable"], json!(true));
    }

    struct Recording(Mutex<Vec<AlertPayload>>);

    #[async_trait]
    impl AlertChannel for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, payload: &AlertPayload) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl AlertChannel for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn deliver(&self, _payload: &AlertPayload) -> anyhow::Result<()> {
            anyhow::bail!("webhook returned 500")
        }
    }

    #[tokio::test]
    async fn test_dispatch_skips_suppressed() {
        let channel = Recording(Mutex::new(vec![]));
        let d = AlertDispatcher::default().decide(&ctx(), &plan(false, 0), None, &summary(0));
        assert!(!dispatch(&channel, &d).await);
        assert!(channel.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_swallows_delivery_errors() {
        let d = AlertDispatcher::default().decide(&ctx(), &plan(true, 10), None, &summary(10));
        assert!(!dispatch(&Broken, &d).await);
    }

    #[tokio::test]
    async fn test_log_channel_accepts_everything() {
        let d = AlertDispatcher::default().decide(&ctx(), &plan(true, 10), None, &summary(10));
        assert!(dispatch(&LogChannel, &d).await);
    }
}
