use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ciqsync_engine::alert::{AlertChannel, AlertDispatcher, AlertPolicy};
use ciqsync_engine::detector::{SourceAggregate, SourceStore};
use ciqsync_engine::instrument::Instrumentation;
use ciqsync_engine::mover::{BulkMover, MoveReport};
use ciqsync_engine::resolve::resolve_window;
use ciqsync_engine::validator::{DestinationStore, QualityAction, QualityGate};
use ciqsync_engine::{RunContext, StageFailure, SyncDriver, SyncError};
use ciqsync_types::alert::{AlertPayload, AlertStatus};
use ciqsync_types::plan::SyncPlan;
use ciqsync_state::{StateBackend, StateError};
use ciqsync_types::state::{CursorState, PipelineId, RunRecord, RunStats, RunStatus, Stage};
use ciqsync_types::window::SyncWindow;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

enum SourceBehaviour {
    Rows { count: i64, entities: i64 },
    Unreachable,
}

struct FakeSource(SourceBehaviour);

#[async_trait]
impl SourceStore for FakeSource {
    async fn aggregate_changes(&self, window: &SyncWindow) -> anyhow::Result<SourceAggregate> {
        match self.0 {
            SourceBehaviour::Rows { count: 0, .. } => Ok(SourceAggregate {
                new_records: 0,
                affected_entities: 0,
                earliest: None,
                latest: None,
            }),
            SourceBehaviour::Rows { count, entities } => Ok(SourceAggregate {
                new_records: count,
                affected_entities: entities,
                earliest: Some(window.reference_time() + Duration::seconds(1)),
                latest: Some(window.now()),
            }),
            SourceBehaviour::Unreachable => anyhow::bail!("connection refused"),
        }
    }
}

#[derive(Default)]
struct FakeDestination {
    observed: u64,
    calls: AtomicUsize,
}

#[async_trait]
impl DestinationStore for FakeDestination {
    async fn count_synced(&self, _plan: &SyncPlan, _until: DateTime<Utc>) -> anyhow::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.observed)
    }
}

struct FakeMover {
    name: &'static str,
    report: Option<MoveReport>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeMover {
    fn reporting(name: &'static str, loaded: u64) -> Self {
        Self {
            name,
            report: Some(MoveReport {
                extracted: loaded,
                transformed: loaded,
                loaded,
                bytes: loaded * 100,
                expected: None,
            }),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn reporting_expected(name: &'static str, loaded: u64, expected: u64) -> Self {
        let mut mover = Self::reporting(name, loaded);
        if let Some(report) = mover.report.as_mut() {
            report.expected = Some(expected);
        }
        mover
    }

    fn failing(name: &'static str) -> Self {
        Self {
            name,
            report: None,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BulkMover for FakeMover {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _plan: &SyncPlan) -> anyhow::Result<Option<MoveReport>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("exit status 1");
        }
        Ok(self.report)
    }
}

#[derive(Default)]
struct RecordingChannel {
    delivered: Mutex<Vec<AlertPayload>>,
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, payload: &AlertPayload) -> anyhow::Result<()> {
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingInstrumentation {
    events: Mutex<Vec<String>>,
}

impl Instrumentation for RecordingInstrumentation {
    fn stage_started(&self, _ctx: &RunContext, stage: Stage) {
        self.events.lock().unwrap().push(format!("start:{stage}"));
    }

    fn stage_finished(&self, _ctx: &RunContext, stage: Stage, _elapsed_secs: f64) {
        self.events.lock().unwrap().push(format!("finish:{stage}"));
    }

    fn capture_failure(&self, _ctx: &RunContext, failure: &StageFailure) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failure:{}", failure.stage));
    }
}

/// State backend whose stored cursor cannot be decoded.
struct CorruptCursorState;

impl StateBackend for CorruptCursorState {
    fn get_cursor(&self, _pipeline: &PipelineId) -> ciqsync_state::error::Result<Option<CursorState>> {
        Err(StateError::Corrupt("invalid reference_time 'yesterday'".into()))
    }

    fn set_cursor(&self, _pipeline: &PipelineId, _reference_time: DateTime<Utc>) -> ciqsync_state::error::Result<()> {
        Ok(())
    }

    fn start_run(&self, _pipeline: &PipelineId, _reference_time: DateTime<Utc>) -> ciqsync_state::error::Result<i64> {
        Ok(1)
    }

    fn complete_run(&self, _run_id: i64, _status: RunStatus, _stats: &RunStats) -> ciqsync_state::error::Result<()> {
        Ok(())
    }

    fn recent_runs(&self, _pipeline: &PipelineId, _limit: usize) -> ciqsync_state::error::Result<Vec<RunRecord>> {
        Ok(Vec::new())
    }
}

struct Harness {
    destination: Arc<FakeDestination>,
    movers: Vec<Arc<FakeMover>>,
    channel: Arc<RecordingChannel>,
    instrumentation: Arc<RecordingInstrumentation>,
    driver: SyncDriver,
}

fn harness(source: SourceBehaviour, observed: u64, movers: Vec<FakeMover>, on_failure: QualityAction) -> Harness {
    let destination = Arc::new(FakeDestination {
        observed,
        calls: AtomicUsize::new(0),
    });
    let movers: Vec<Arc<FakeMover>> = movers.into_iter().map(Arc::new).collect();
    let channel = Arc::new(RecordingChannel::default());
    let instrumentation = Arc::new(RecordingInstrumentation::default());

    let mut driver = SyncDriver::new(
        Arc::new(FakeSource(source)),
        destination.clone(),
        QualityGate::new(0.95, on_failure).unwrap(),
        AlertDispatcher::new(AlertPolicy {
            title: "CIQ Hourly Sync".into(),
            significant_volume: 5,
        }),
    )
    .with_channel(channel.clone())
    .with_instrumentation(instrumentation.clone());
    for mover in &movers {
        driver = driver.with_mover(mover.clone());
    }

    Harness {
        destination,
        movers,
        channel,
        instrumentation,
        driver,
    }
}

fn ctx() -> RunContext {
    RunContext::new("ciq_sync", "test-run")
}

fn window() -> SyncWindow {
    let now = Utc::now();
    SyncWindow::new(now - Duration::hours(1), now).unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_new_data_skips_every_downstream_stage() {
    let h = harness(
        SourceBehaviour::Rows { count: 0, entities: 0 },
        0,
        vec![FakeMover::reporting("sync", 10)],
        QualityAction::Warn,
    );
    let report = h.driver.run_once(&ctx(), window()).await.unwrap();

    assert_eq!(report.status, AlertStatus::Skip);
    assert!(!report.plan.should_run);
    assert!(report.validation.is_none());
    assert!(!report.decision.should_send);
    assert!(!report.alert_delivered);
    assert_eq!(h.movers[0].calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.destination.calls.load(Ordering::SeqCst), 0);
    assert!(h.channel.delivered.lock().unwrap().is_empty());
    assert_eq!(
        *h.instrumentation.events.lock().unwrap(),
        ["start:detect", "finish:detect", "start:plan", "finish:plan", "start:alert", "finish:alert"]
    );
}

#[tokio::test]
async fn partial_landing_below_threshold_is_a_sent_warning() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        39,
        vec![FakeMover::reporting("sync", 39)],
        QualityAction::Warn,
    );
    let report = h.driver.run_once(&ctx(), window()).await.unwrap();

    let validation = report.validation.unwrap();
    assert_eq!(validation.expected_count, 42);
    assert_eq!(validation.observed_count, 39);
    assert!((validation.success_rate - 39.0 / 42.0).abs() < 1e-12);
    assert!(!validation.passed);
    assert_eq!(report.status, AlertStatus::Warning);
    assert!(report.alert_delivered);

    let delivered = h.channel.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].status, AlertStatus::Warning);
    assert!(delivered[0].body.contains("39/42"));
}

#[tokio::test]
async fn unreachable_source_sends_failure_and_returns_error() {
    let h = harness(
        SourceBehaviour::Unreachable,
        0,
        vec![FakeMover::reporting("sync", 10)],
        QualityAction::Warn,
    );
    let failure = h.driver.run_once(&ctx(), window()).await.unwrap_err();

    assert_eq!(failure.failure.stage, Stage::Detect);
    assert!(matches!(failure.failure.error, SyncError::SourceUnavailable(_)));
    assert!(failure.failure.error.is_retryable());
    assert_eq!(failure.decision.status, AlertStatus::Failure);
    assert!(failure.alert_delivered);
    assert_eq!(failure.metrics.error_count, 1);
    assert_eq!(h.movers[0].calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.destination.calls.load(Ordering::SeqCst), 0);

    let delivered = h.channel.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].status, AlertStatus::Failure);
    assert!(delivered[0].body.contains("connection refused"));
    assert!(h
        .instrumentation
        .events
        .lock()
        .unwrap()
        .contains(&"failure:detect".to_string()));
}

#[tokio::test]
async fn low_volume_success_is_suppressed() {
    let h = harness(
        SourceBehaviour::Rows { count: 3, entities: 1 },
        3,
        vec![FakeMover::reporting("sync", 3)],
        QualityAction::Warn,
    );
    let report = h.driver.run_once(&ctx(), window()).await.unwrap();

    assert_eq!(report.status, AlertStatus::Warning);
    assert!(!report.decision.should_send);
    assert!(!report.alert_delivered);
    assert!(h.channel.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn healthy_run_succeeds_and_accumulates_mover_metrics() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        42,
        vec![FakeMover::reporting("sync", 42), FakeMover::reporting("realtime_aggregates", 0)],
        QualityAction::Warn,
    );
    let report = h.driver.run_once(&ctx(), window()).await.unwrap();

    assert_eq!(report.status, AlertStatus::Success);
    assert!(report.alert_delivered);
    assert_eq!(report.metrics.loaded, 42);
    assert_eq!(report.metrics.bytes_processed, 4200);
    assert!(h.movers.iter().all(|m| m.calls.load(Ordering::SeqCst) == 1));
    assert_eq!(h.destination.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mover_failure_stops_before_validation() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        42,
        vec![FakeMover::failing("sync"), FakeMover::reporting("realtime_aggregates", 0)],
        QualityAction::Warn,
    );
    let failure = h.driver.run_once(&ctx(), window()).await.unwrap_err();

    assert_eq!(failure.failure.stage, Stage::Move);
    assert!(failure.to_string().starts_with("move stage failed: mover step 'sync' failed"));
    assert_eq!(h.movers[1].calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.destination.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.channel.delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn tripped_gate_under_fail_policy_takes_failure_path() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        39,
        vec![FakeMover::reporting("sync", 39)],
        QualityAction::Fail,
    );
    let failure = h.driver.run_once(&ctx(), window()).await.unwrap_err();

    assert_eq!(failure.failure.stage, Stage::Validate);
    assert!(!failure.failure.error.is_retryable());
    assert_eq!(failure.decision.status, AlertStatus::Failure);
    assert_eq!(
        failure.decision.structured_context["error_kind"],
        serde_json::json!("validation_failed")
    );
}

#[tokio::test]
async fn plan_only_touches_nothing_downstream() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        42,
        vec![FakeMover::reporting("sync", 42)],
        QualityAction::Warn,
    );
    let w = window();
    let (summary, plan) = h.driver.plan_only(&ctx(), w).await.unwrap();

    assert_eq!(summary.new_record_count(), 42);
    assert!(plan.should_run);
    assert_eq!(plan.since, w.reference_time());
    assert_eq!(plan.expected_count, 42);
    assert_eq!(h.movers[0].calls.load(Ordering::SeqCst), 0);
    assert!(h.channel.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mover_cannot_lower_expected_count_under_warn_policy() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        0,
        vec![FakeMover::reporting_expected("sync", 0, 0)],
        QualityAction::Warn,
    );
    let report = h.driver.run_once(&ctx(), window()).await.unwrap();

    let validation = report.validation.unwrap();
    assert_eq!(validation.expected_count, 42);
    assert_eq!(validation.observed_count, 0);
    assert!(!validation.passed);
    assert_eq!(report.status, AlertStatus::Warning);
    assert!(report.decision.should_send);
    assert!(report.alert_delivered);
}

#[tokio::test]
async fn mover_cannot_lower_expected_count_under_fail_policy() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        0,
        vec![FakeMover::reporting_expected("sync", 0, 0)],
        QualityAction::Fail,
    );
    let failure = h.driver.run_once(&ctx(), window()).await.unwrap_err();

    assert_eq!(failure.failure.stage, Stage::Validate);
    assert!(matches!(
        failure.failure.error,
        SyncError::ValidationFailed { expected: 42, observed: 0, .. }
    ));
    assert!(failure.alert_delivered);
}

#[tokio::test]
async fn later_step_cannot_overwrite_earlier_expected_count() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        45,
        vec![
            FakeMover::reporting_expected("sync", 45, 50),
            FakeMover::reporting_expected("realtime_aggregates", 0, 1),
        ],
        QualityAction::Warn,
    );
    let report = h.driver.run_once(&ctx(), window()).await.unwrap();

    let validation = report.validation.unwrap();
    assert_eq!(validation.expected_count, 50);
    assert_eq!(validation.observed_count, 45);
    assert!(!validation.passed);
    assert_eq!(report.status, AlertStatus::Warning);
}

#[tokio::test]
async fn unreadable_cursor_sends_state_failure_alert() {
    let h = harness(
        SourceBehaviour::Rows { count: 42, entities: 7 },
        42,
        vec![FakeMover::reporting("sync", 42)],
        QualityAction::Warn,
    );
    let pipeline = PipelineId::new("ciq_sync");
    let error = resolve_window(&CorruptCursorState, &pipeline, None, 3600, Utc::now()).unwrap_err();
    assert!(matches!(error, SyncError::State(_)));

    let failure = h
        .driver
        .fail_before_run(&ctx(), StageFailure::new(Stage::Detect, error))
        .await;

    assert_eq!(failure.decision.status, AlertStatus::Failure);
    assert!(failure.alert_delivered);
    assert_eq!(failure.metrics.error_count, 1);
    assert_eq!(failure.decision.structured_context["stage"], serde_json::json!("detect"));
    assert_eq!(failure.decision.structured_context["error_kind"], serde_json::json!("state"));
    assert_eq!(failure.decision.structured_context["retryable"], serde_json::json!(true));
    assert_eq!(h.movers[0].calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.destination.calls.load(Ordering::SeqCst), 0);

    let delivered = h.channel.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].body.contains("yesterday"));
    assert_eq!(
        *h.instrumentation.events.lock().unwrap(),
        ["failure:detect"]
    );
}
