//! Instrumentation capability passed explicitly to the run driver.

use std::fmt;

use ciqsync_types::state::{PipelineId, Stage};
use serde::{Deserialize, Serialize};

use crate::errors::StageFailure;

/// Identity of one run, threaded through stages and alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub pipeline: PipelineId,
    pub run_id: String,
}

impl RunContext {
    #[must_use]
    pub fn new(pipeline: impl Into<PipelineId>, run_id: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pipeline, self.run_id)
    }
}

/// Stage-boundary hooks. Fire-and-forget: implementations must not fail
/// the run.
pub trait Instrumentation: Send + Sync {
    fn stage_started(&self, ctx: &RunContext, stage: Stage);

    fn stage_finished(&self, ctx: &RunContext, stage: Stage, elapsed_secs: f64);

    fn capture_failure(&self, ctx: &RunContext, failure: &StageFailure);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn stage_started(&self, _ctx: &RunContext, _stage: Stage) {}

    fn stage_finished(&self, _ctx: &RunContext, _stage: Stage, _elapsed_secs: f64) {}

    fn capture_failure(&self, _ctx: &RunContext, _failure: &StageFailure) {}
}

/// Monitoring settings, loaded from the `monitoring` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub release: Option<String>,
    /// Tag attached to every event, identifying the emitting component.
    #[serde(default = "default_component")]
    pub component: String,
}

fn default_enabled() -> bool {
    true
}

fn default_environment() -> String {
    "production".into()
}

fn default_component() -> String {
    "ciq_sync".into()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            environment: default_environment(),
            release: None,
            component: default_component(),
        }
    }
}

/// Emits stage boundaries and failures as `tracing` events tagged with
/// the monitoring environment.
#[derive(Debug, Clone)]
pub struct TracingMonitor {
    config: MonitoringConfig,
}

impl TracingMonitor {
    #[must_use]
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }
}

impl Instrumentation for TracingMonitor {
    fn stage_started(&self, ctx: &RunContext, stage: Stage) {
        if !self.config.enabled {
            return;
        }
        tracing::debug!(
            pipeline = %ctx.pipeline,
            run_id = %ctx.run_id,
            stage = %stage,
            component = %self.config.component,
            environment = %self.config.environment,
            "Stage started"
        );
    }

    fn stage_finished(&self, ctx: &RunContext, stage: Stage, elapsed_secs: f64) {
        if !self.config.enabled {
            return;
        }
        tracing::info!(
            pipeline = %ctx.pipeline,
            run_id = %ctx.run_id,
            stage = %stage,
            elapsed_secs,
            component = %self.config.component,
            environment = %self.config.environment,
            "Stage finished"
        );
    }

    fn capture_failure(&self, ctx: &RunContext, failure: &StageFailure) {
        if !self.config.enabled {
            return;
        }
        tracing::error!(
            pipeline = %ctx.pipeline,
            run_id = %ctx.run_id,
            stage = %failure.stage,
            error_kind = failure.error.kind(),
            retryable = failure.error.is_retryable(),
            component = %self.config.component,
            environment = %self.config.environment,
            release = self.config.release.as_deref().unwrap_or("unknown"),
            "{failure}"
        );
    }
}
