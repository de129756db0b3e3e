use std::future::Future;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use chrono::{DateTime, Utc};
use ciqsync_engine::resolve::{build_driver, create_state_backend, resolve_window};
use ciqsync_engine::{RunContext, RunFailure, RunReport, StageFailure};
use ciqsync_state::StateBackend;
use ciqsync_types::alert::AlertStatus;
use ciqsync_types::state::{PipelineId, RunStats, RunStatus, Stage};

use super::load_pipeline;

const FAILURE_EXIT: u8 = 1;

/// Stdout prefix of the machine-readable run line.
const RUN_JSON_MARKER: &str = "@@RUN_JSON@@";

/// Process exit status for a terminal run status.
fn exit_code(status: AlertStatus) -> u8 {
    match status {
        AlertStatus::Success => 0,
        AlertStatus::Failure => FAILURE_EXIT,
        AlertStatus::Warning => 2,
        AlertStatus::Skip => 3,
    }
}

/// Execute the `run` command: resolve the window, run once, record history.
pub async fn execute(
    pipeline_path: &Path,
    since: Option<DateTime<Utc>>,
    dry_run: bool,
) -> Result<ExitCode> {
    let config = load_pipeline(pipeline_path)?;
    let pipeline = PipelineId::new(config.pipeline.clone());
    let state = create_state_backend(&config)?;
    let driver = build_driver(&config)?;
    tracing::info!(
        pipeline = %pipeline,
        movers = config.movers.len(),
        "Pipeline validated"
    );

    let now = Utc::now();
    let resolved = resolve_window(
        state.as_ref(),
        &pipeline,
        since,
        config.schedule.lookback_seconds,
        now,
    );

    if dry_run {
        let window = resolved?;
        let ctx = RunContext::new(pipeline, "dry-run");
        let (summary, plan) = driver.plan_only(&ctx, window).await?;
        println!("Pipeline '{}' (dry run)", config.pipeline);
        println!("  Window:          {} .. {}", window.reference_time(), window.now());
        println!("  New records:     {}", summary.new_record_count());
        println!("  Affected:        {}", summary.affected_entity_count());
        println!("  Would run:       {}", plan.should_run);
        return Ok(ExitCode::SUCCESS);
    }

    let window = match resolved {
        Ok(window) => window,
        Err(error) => {
            let ctx = RunContext::new(pipeline, format!("unstarted-{}", now.timestamp()));
            let failure = driver
                .fail_before_run(&ctx, StageFailure::new(Stage::Detect, error))
                .await;
            print_failure(&config.pipeline, &failure);
            return Ok(ExitCode::from(FAILURE_EXIT));
        }
    };

    let run_id = match state.start_run(&pipeline, window.reference_time()) {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(
                pipeline = %pipeline,
                error = %e,
                "Failed to record run start, continuing without history"
            );
            None
        }
    };
    let ctx = RunContext::new(
        pipeline,
        run_id.map_or_else(|| format!("unrecorded-{}", now.timestamp()), |id| id.to_string()),
    );

    let outcome = tokio::select! {
        outcome = driver.run_once(&ctx, window) => outcome,
        () = shutdown_signal() => {
            tracing::warn!(run_id = %ctx.run_id, "Run cancelled");
            let stats = RunStats {
                error_message: Some("cancelled".into()),
                ..RunStats::default()
            };
            complete(state.as_ref(), run_id, RunStatus::Failed, &stats);
            anyhow::bail!("Run cancelled");
        }
    };

    match outcome {
        Ok(report) => {
            complete(
                state.as_ref(),
                run_id,
                RunStatus::from(report.status),
                &report_stats(&report),
            );
            print_report(&config.pipeline, &report);
            Ok(ExitCode::from(exit_code(report.status)))
        }
        Err(failure) => {
            complete(state.as_ref(), run_id, RunStatus::Failed, &failure_stats(&failure));
            print_failure(&config.pipeline, &failure);
            Ok(ExitCode::from(FAILURE_EXIT))
        }
    }
}

fn report_stats(report: &RunReport) -> RunStats {
    RunStats {
        expected_count: report.validation.map_or(0, |v| v.expected_count),
        observed_count: report.validation.map_or(0, |v| v.observed_count),
        records_loaded: report.metrics.loaded,
        bytes_processed: report.metrics.bytes_processed,
        success_rate: report.validation.map(|v| v.success_rate),
        error_message: None,
    }
}

fn failure_stats(failure: &RunFailure) -> RunStats {
    RunStats {
        records_loaded: failure.metrics.loaded,
        bytes_processed: failure.metrics.bytes_processed,
        error_message: Some(failure.to_string()),
        ..RunStats::default()
    }
}

/// History is best-effort; a failed write never changes the run outcome.
fn complete(state: &dyn StateBackend, run_id: Option<i64>, status: RunStatus, stats: &RunStats) {
    let Some(run_id) = run_id else {
        return;
    };
    if let Err(e) = state.complete_run(run_id, status, stats) {
        tracing::warn!(run_id, error = %e, "Failed to record run completion");
    }
}

fn print_report(pipeline: &str, report: &RunReport) {
    println!("Pipeline '{}' finished: {}", pipeline, report.status);
    println!("  {}", report.decision.message);
    if let Some(v) = &report.validation {
        println!(
            "  Validation:      {}/{} ({:.1}%, threshold {:.1}%)",
            v.observed_count,
            v.expected_count,
            v.success_rate * 100.0,
            v.threshold * 100.0
        );
    }
    println!("  Alert sent:      {}", report.alert_delivered);
    println!("{}", report.metrics);

    println!("{RUN_JSON_MARKER}{}", report_json(report));
}

fn print_failure(pipeline: &str, failure: &RunFailure) {
    eprintln!("Pipeline '{pipeline}' failed: {failure}");
    println!("  Alert sent:      {}", failure.alert_delivered);
    println!("{}", failure.metrics);
    println!("{RUN_JSON_MARKER}{}", failure_json(failure));
}

// Machine-readable lines for schedulers

fn report_json(report: &RunReport) -> serde_json::Value {
    serde_json::json!({
        "status": report.status,
        "should_send": report.decision.should_send,
        "alert_delivered": report.alert_delivered,
        "since": report.plan.since,
        "expected_count": report.validation.map(|v| v.expected_count),
        "observed_count": report.validation.map(|v| v.observed_count),
        "success_rate": report.validation.map(|v| v.success_rate),
        "records_loaded": report.metrics.loaded,
        "bytes_processed": report.metrics.bytes_processed,
        "duration_secs": report.metrics.duration_secs,
    })
}

fn failure_json(failure: &RunFailure) -> serde_json::Value {
    let error = &failure.failure.error;
    serde_json::json!({
        "status": AlertStatus::Failure,
        "stage": failure.failure.stage.as_str(),
        "error_kind": error.kind(),
        "retryable": error.is_retryable(),
        "error": failure.to_string(),
        "should_send": failure.decision.should_send,
        "alert_delivered": failure.alert_delivered,
        "records_loaded": failure.metrics.loaded,
        "bytes_processed": failure.metrics.bytes_processed,
        "duration_secs": failure.metrics.duration_secs,
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                signal_or_pending(tokio::signal::ctrl_c()).await;
                return;
            }
        };
        tokio::select! {
            () = signal_or_pending(tokio::signal::ctrl_c()) => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        signal_or_pending(tokio::signal::ctrl_c()).await;
    }
}

/// Resolve only when the signal actually arrives. A handler that fails to
/// install never resolves, so it cannot cancel a run.
async fn signal_or_pending<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}
