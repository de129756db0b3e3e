//! Run driver: threads stage outputs explicitly and owns the failure path.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use ciqsync_types::alert::{AlertDecision, AlertStatus};
use ciqsync_types::change::ChangeSummary;
use ciqsync_types::metrics::RunSummary;
use ciqsync_types::plan::SyncPlan;
use ciqsync_types::state::Stage;
use ciqsync_types::validation::ValidationResult;
use ciqsync_types::window::SyncWindow;

use crate::alert::{dispatch, AlertChannel, AlertDispatcher, LogChannel};
use crate::detector::{detect, SourceStore};
use crate::errors::{StageFailure, SyncError};
use crate::instrument::{Instrumentation, NoopInstrumentation, RunContext};
use crate::metrics::RunMetrics;
use crate::mover::BulkMover;
use crate::planner;
use crate::validator::{DestinationStore, QualityGate};

/// Result of a run in which no stage raised.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: AlertStatus,
    pub summary: ChangeSummary,
    pub plan: SyncPlan,
    /// `None` for skipped runs.
    pub validation: Option<ValidationResult>,
    pub metrics: RunSummary,
    pub decision: AlertDecision,
    pub alert_delivered: bool,
}

/// A run that stopped at a stage. The failure alert has already been
/// attempted when this is returned.
#[derive(Debug, thiserror::Error)]
#[error("{failure}")]
pub struct RunFailure {
    pub failure: StageFailure,
    pub metrics: RunSummary,
    pub decision: AlertDecision,
    pub alert_delivered: bool,
}

/// Outputs of the stages before alerting.
struct StageOutputs {
    summary: ChangeSummary,
    plan: SyncPlan,
    validation: Option<ValidationResult>,
}

pub struct SyncDriver {
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
    movers: Vec<Arc<dyn BulkMover>>,
    channel: Arc<dyn AlertChannel>,
    instrumentation: Arc<dyn Instrumentation>,
    gate: QualityGate,
    dispatcher: AlertDispatcher,
}

impl SyncDriver {
    /// Driver with no mover steps, log-only alerts and no instrumentation.
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
        gate: QualityGate,
        dispatcher: AlertDispatcher,
    ) -> Self {
        Self {
            source,
            destination,
            movers: Vec::new(),
            channel: Arc::new(LogChannel),
            instrumentation: Arc::new(NoopInstrumentation),
            gate,
            dispatcher,
        }
    }

    /// Append a mover step. Steps run in the order they are added.
    #[must_use]
    pub fn with_mover(mut self, mover: Arc<dyn BulkMover>) -> Self {
        self.movers.push(mover);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    #[must_use]
    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Execute one run over `window`.
    ///
    /// # Errors
    ///
    /// Returns [`RunFailure`] when any stage raises, after the failure
    /// alert has been composed and delivery attempted.
    pub async fn run_once(&self, ctx: &RunContext, window: SyncWindow) -> Result<RunReport, RunFailure> {
        let mut metrics = RunMetrics::new(ctx.pipeline.as_str());
        tracing::info!(
            pipeline = %ctx.pipeline,
            run_id = %ctx.run_id,
            since = %window.reference_time(),
            until = %window.now(),
            "Starting sync run"
        );

        match self.execute(ctx, &window, &mut metrics).await {
            Ok(outputs) => {
                let snapshot = metrics.summary();
                self.instrumentation.stage_started(ctx, Stage::Alert);
                let started = Instant::now();
                let decision = self.dispatcher.decide(
                    ctx,
                    &outputs.plan,
                    outputs.validation.as_ref(),
                    &snapshot,
                );
                let alert_delivered = dispatch(self.channel.as_ref(), &decision).await;
                self.instrumentation
                    .stage_finished(ctx, Stage::Alert, started.elapsed().as_secs_f64());

                tracing::info!(
                    pipeline = %ctx.pipeline,
                    run_id = %ctx.run_id,
                    status = %decision.status,
                    "Sync run finished"
                );
                Ok(RunReport {
                    status: decision.status,
                    summary: outputs.summary,
                    plan: outputs.plan,
                    validation: outputs.validation,
                    metrics: snapshot,
                    decision,
                    alert_delivered,
                })
            }
            Err(failure) => Err(self.fail(ctx, failure, metrics).await),
        }
    }

    /// Take the failure path for a run that could not start, e.g. because
    /// the reference cursor could not be read. No stage is executed.
    pub async fn fail_before_run(&self, ctx: &RunContext, failure: StageFailure) -> RunFailure {
        tracing::error!(
            pipeline = %ctx.pipeline,
            run_id = %ctx.run_id,
            error = %failure,
            "Sync run could not start"
        );
        self.fail(ctx, failure, RunMetrics::new(ctx.pipeline.as_str())).await
    }

    async fn fail(&self, ctx: &RunContext, failure: StageFailure, mut metrics: RunMetrics) -> RunFailure {
        metrics.record_error(failure.to_string());
        self.instrumentation.capture_failure(ctx, &failure);
        let snapshot = metrics.summary();
        let decision = self.dispatcher.decide_failure(ctx, &failure, &snapshot);
        let alert_delivered = dispatch(self.channel.as_ref(), &decision).await;
        RunFailure {
            failure,
            metrics: snapshot,
            decision,
            alert_delivered,
        }
    }

    /// Detect and plan only. Nothing downstream is touched and no alert is
    /// composed.
    ///
    /// # Errors
    ///
    /// Returns the [`StageFailure`] of the detect stage.
    pub async fn plan_only(
        &self,
        ctx: &RunContext,
        window: SyncWindow,
    ) -> Result<(ChangeSummary, SyncPlan), StageFailure> {
        let summary = self
            .stage(ctx, Stage::Detect, detect(self.source.as_ref(), &window))
            .await?;
        let plan = self
            .stage(ctx, Stage::Plan, async { Ok(planner::plan(&summary)) })
            .await?;
        Ok((summary, plan))
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        window: &SyncWindow,
        metrics: &mut RunMetrics,
    ) -> Result<StageOutputs, StageFailure> {
        let (summary, plan) = self.plan_only(ctx, *window).await?;
        if !plan.should_run {
            tracing::info!(pipeline = %ctx.pipeline, "Skipping downstream stages");
            return Ok(StageOutputs {
                summary,
                plan,
                validation: None,
            });
        }

        let expected = self
            .stage(ctx, Stage::Move, self.run_movers(&plan, metrics))
            .await?;

        let validation = self
            .stage(
                ctx,
                Stage::Validate,
                self.gate
                    .evaluate(self.destination.as_ref(), &plan, expected, window.now()),
            )
            .await?;

        Ok(StageOutputs {
            summary,
            plan,
            validation: Some(validation),
        })
    }

    /// Run every mover step in order. Returns the expected count for the
    /// quality gate: the detector's count, raised by any step that reports
    /// more. A step can never lower it.
    async fn run_movers(&self, plan: &SyncPlan, metrics: &mut RunMetrics) -> Result<u64, SyncError> {
        let mut expected = plan.expected_count;
        for mover in &self.movers {
            let started = Instant::now();
            let report = mover.run(plan).await.map_err(|reason| SyncError::MoverFailed {
                step: mover.name().to_string(),
                reason,
            })?;
            tracing::info!(
                step = mover.name(),
                elapsed_secs = started.elapsed().as_secs_f64(),
                reported = report.is_some(),
                "Mover step finished"
            );
            if let Some(report) = report {
                metrics.record_extracted(report.extracted);
                metrics.record_transformed(report.transformed);
                metrics.record_loaded(report.loaded, report.bytes);
                match report.expected {
                    Some(reported) if reported > expected => {
                        tracing::info!(
                            step = mover.name(),
                            reported,
                            detected = plan.expected_count,
                            "Mover raised expected count"
                        );
                        expected = reported;
                    }
                    Some(reported) if reported < plan.expected_count => {
                        tracing::warn!(
                            step = mover.name(),
                            reported,
                            detected = plan.expected_count,
                            "Ignoring mover-reported expected count below detector count"
                        );
                    }
                    _ => {}
                }
            }
        }
        Ok(expected)
    }

    async fn stage<T, F>(&self, ctx: &RunContext, stage: Stage, fut: F) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        self.instrumentation.stage_started(ctx, stage);
        let started = Instant::now();
        match fut.await {
            Ok(value) => {
                self.instrumentation
                    .stage_finished(ctx, stage, started.elapsed().as_secs_f64());
                Ok(value)
            }
            Err(error) => Err(StageFailure::new(stage, error)),
        }
    }
}
