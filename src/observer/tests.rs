use super::*;
use crate::error::{PhasewatchError, SinkError, SourceError};
use crate::phase::{AppReport, CanonicalPhase, FailureKind, InfraCode, InfraState};
use crate::sink::RecordingSink;
use crate::snapshot::Snapshot;
use crate::phase::AppProbe;
use crate::sources::{AppStateSource, InfraStateSource, ScriptedAppSource, ScriptedInfraSource};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const POLL: Duration = Duration::from_secs(5);

struct Harness {
    infra: Arc<ScriptedInfraSource>,
    app: Arc<ScriptedAppSource>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(infra: ScriptedInfraSource, app: ScriptedAppSource) -> Self {
        Self {
            infra: Arc::new(infra),
            app: Arc::new(app),
            sink: Arc::new(RecordingSink::new()),
        }
    }

    fn sources(&self) -> StateSources {
        StateSources::new(self.infra.clone(), self.app.clone())
    }

    async fn start(&self, timeout: Option<Duration>) -> TerminalResult {
        observe_start(
            "i-test",
            &self.sources(),
            self.sink.clone(),
            ObserverSettings::new(POLL, timeout),
            &CancellationToken::new(),
        )
        .await
    }

    async fn stop(&self, timeout: Option<Duration>) -> TerminalResult {
        observe_stop(
            "i-test",
            &self.sources(),
            self.sink.clone(),
            ObserverSettings::new(POLL, timeout),
            &CancellationToken::new(),
        )
        .await
    }

    fn published_phases(&self) -> Vec<(CanonicalPhase, CanonicalPhase)> {
        self.sink
            .snapshots()
            .iter()
            .map(|s| (s.infra_phase, s.app_phase))
            .collect()
    }
}

struct FailingSink;

impl crate::sink::StatusSink for FailingSink {
    fn publish(&self, _snapshot: &Snapshot) -> Result<(), SinkError> {
        Err(SinkError::Write {
            details: "render failed".to_string(),
        })
    }
}

/// Infra source whose queries never answer
struct HangingInfra;

#[async_trait::async_trait]
impl InfraStateSource for HangingInfra {
    async fn query(&self, _resource_id: &str) -> Result<InfraCode, SourceError> {
        std::future::pending().await
    }

    fn source_name(&self) -> &str {
        "hanging"
    }
}

/// App source whose queries never answer
struct HangingApp;

#[async_trait::async_trait]
impl AppStateSource for HangingApp {
    async fn query(&self, _resource_id: &str, _direction: Direction) -> AppProbe {
        std::future::pending().await
    }

    fn source_name(&self) -> &str {
        "hanging"
    }
}

/// Records how far each source had been polled when the handoff ran
struct RecordingHandoff {
    infra: Arc<ScriptedInfraSource>,
    app: Arc<ScriptedAppSource>,
    seen: Mutex<Vec<(usize, usize)>>,
    fail: bool,
}

impl RecordingHandoff {
    fn new(harness: &Harness, fail: bool) -> Self {
        Self {
            infra: harness.infra.clone(),
            app: harness.app.clone(),
            seen: Mutex::new(Vec::new()),
            fail,
        }
    }
}

#[async_trait::async_trait]
impl StageHandoff for RecordingHandoff {
    async fn handoff(&self, _resource_id: &str, _direction: Direction) -> crate::error::Result<()> {
        self.seen.lock().push((self.infra.calls(), self.app.calls()));
        if self.fail {
            return Err(PhasewatchError::rejected("stop command failed"));
        }
        Ok(())
    }
}

fn assert_ticks_increase(snapshots: &[Snapshot]) {
    for pair in snapshots.windows(2) {
        assert!(
            pair[0].tick < pair[1].tick,
            "tick {} published after tick {}",
            pair[1].tick,
            pair[0].tick
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_converges_with_deduplicated_publishes() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[
            InfraState::Pending,
            InfraState::Pending,
            InfraState::Running,
        ]),
        ScriptedAppSource::from_statuses(&["starting", "starting", "running"]),
    );

    let result = harness.start(None).await;

    assert!(result.is_converged(), "unexpected result: {:?}", result);
    let last = result.snapshot();
    assert_eq!(last.infra_phase, CanonicalPhase::Running);
    assert_eq!(last.app_phase, CanonicalPhase::Running);
    assert_eq!(last.combined_phase, CanonicalPhase::Running);
    assert_eq!(last.tick, 6);

    use CanonicalPhase::*;
    assert_eq!(
        harness.published_phases(),
        vec![
            (Starting, Stopped),
            (Running, Stopped),
            (Running, Starting),
            (Running, Running),
        ]
    );
    assert_eq!(harness.infra.calls(), 3);
    assert_eq!(harness.app.directions(), vec![Direction::Start; 3]);
    assert_ticks_increase(&harness.sink.snapshots());
}

#[tokio::test(start_paused = true)]
async fn test_stop_polls_app_then_infra() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[
            InfraState::Running,
            InfraState::Stopping,
            InfraState::Stopped,
        ]),
        ScriptedAppSource::from_statuses(&["running", "stopping", "stopped"]),
    );

    let result = harness.stop(None).await;

    assert!(result.is_converged(), "unexpected result: {:?}", result);
    assert_eq!(result.snapshot().combined_phase, CanonicalPhase::Stopped);
    assert_eq!(result.snapshot().infra_phase, CanonicalPhase::Stopped);
    assert_eq!(result.snapshot().app_phase, CanonicalPhase::Stopped);

    use CanonicalPhase::*;
    assert_eq!(
        harness.published_phases(),
        vec![
            (Running, Running),
            (Running, Stopping),
            (Running, Stopped),
            (Stopping, Stopped),
            (Stopped, Stopped),
        ]
    );
    assert_eq!(harness.app.directions(), vec![Direction::Stop; 3]);
    assert_eq!(harness.infra.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_infra_shutting_down_aborts_without_probing_app() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Pending, InfraState::ShuttingDown]),
        ScriptedAppSource::from_statuses(&["running"]),
    );

    let result = harness.start(None).await;

    match &result {
        TerminalResult::Aborted { snapshot, reason } => {
            assert_eq!(*reason, AbortReason::InfraInvalid);
            assert_eq!(snapshot.tick, 2);
            assert_eq!(snapshot.combined_phase, CanonicalPhase::Invalid);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(harness.infra.calls(), 2);
    assert_eq!(harness.app.calls(), 0);
    assert!(harness.sink.last().unwrap().is_invalid());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_returns_last_observed_snapshot() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Pending]),
        ScriptedAppSource::from_statuses(&["running"]),
    );

    let result = harness.start(Some(Duration::from_secs(12))).await;

    match &result {
        TerminalResult::TimedOut(snapshot) => {
            assert_eq!(snapshot.infra_phase, CanonicalPhase::Starting);
            assert_eq!(snapshot.tick, 3);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    // Three identical observations, one publish
    assert_eq!(harness.sink.len(), 1);
    assert_eq!(harness.app.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_phase_publishes_once() {
    let mut states = vec![InfraState::Pending; 8];
    states.push(InfraState::Running);
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&states),
        ScriptedAppSource::from_statuses(&["running"]),
    );

    let result = harness.start(None).await;

    assert!(result.is_converged());
    assert_eq!(harness.sink.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_covers_poll_intervals() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[
            InfraState::Pending,
            InfraState::Pending,
            InfraState::Running,
        ]),
        ScriptedAppSource::from_statuses(&["starting", "starting", "running"]),
    );

    let started = Instant::now();
    let result = harness.start(None).await;

    let ticks = result.snapshot().tick as u32;
    assert_eq!(ticks, 6);
    assert!(started.elapsed() >= POLL * (ticks - 1));
}

#[tokio::test(start_paused = true)]
async fn test_transient_infra_failures_are_retried() {
    let harness = Harness::new(
        ScriptedInfraSource::new(vec![
            Err(SourceError::connectivity("throttled")),
            Ok(InfraState::Pending.into()),
            Err(SourceError::connectivity("throttled")),
            Ok(InfraState::Running.into()),
        ]),
        ScriptedAppSource::from_statuses(&["running"]),
    );

    let result = harness.start(None).await;

    assert!(result.is_converged(), "unexpected result: {:?}", result);
    assert_eq!(harness.infra.calls(), 4);
    assert_eq!(result.snapshot().tick, 5);
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_aborts_in_both_directions() {
    let start = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Running]),
        ScriptedAppSource::new(vec![Err(FailureKind::AuthRejected)]),
    );
    let result = start.start(None).await;
    assert!(matches!(
        &result,
        TerminalResult::Aborted { reason: AbortReason::AuthRejected, .. }
    ));
    assert_eq!(result.snapshot().app_phase, CanonicalPhase::Invalid);

    let stop = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Running]),
        ScriptedAppSource::new(vec![Err(FailureKind::AuthRejected)]),
    );
    let result = stop.stop(None).await;
    assert!(matches!(
        &result,
        TerminalResult::Aborted { reason: AbortReason::AuthRejected, .. }
    ));
    // The stop path must not have moved on to the instance
    assert_eq!(stop.infra.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_app_reads_by_direction() {
    // Start: unreachable means still booting
    let start = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Running]),
        ScriptedAppSource::new(vec![
            Err(FailureKind::Timeout),
            Err(FailureKind::ServiceNotReady),
            Ok(AppReport::with_status("running")),
        ]),
    );
    let result = start.start(None).await;
    assert!(result.is_converged());
    assert_eq!(
        start.sink.snapshots()[1].app_phase,
        CanonicalPhase::Starting
    );

    // Stop: the same timeout means the app is already gone
    let stop = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Stopped]),
        ScriptedAppSource::new(vec![Err(FailureKind::Timeout)]),
    );
    let result = stop.stop(None).await;
    assert!(result.is_converged());
    assert_eq!(stop.app.calls(), 1);
    assert_eq!(result.snapshot().tick, 2);
}

#[tokio::test(start_paused = true)]
async fn test_app_failure_status_aborts() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Running]),
        ScriptedAppSource::from_statuses(&["starting", "failed", "running"]),
    );

    let result = harness.start(None).await;

    assert!(matches!(
        &result,
        TerminalResult::Aborted { reason: AbortReason::AppInvalid, .. }
    ));
    assert_eq!(harness.app.calls(), 2);
    assert!(harness.sink.last().unwrap().is_invalid());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_codes_fail_loudly() {
    let harness = Harness::new(
        ScriptedInfraSource::new(vec![Ok(InfraCode(99))]),
        ScriptedAppSource::from_statuses(&["running"]),
    );
    let result = harness.start(None).await;
    assert!(matches!(
        &result,
        TerminalResult::Aborted { reason: AbortReason::UnknownCode(_), .. }
    ));

    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Running]),
        ScriptedAppSource::from_statuses(&["warming-up"]),
    );
    let result = harness.start(None).await;
    assert!(matches!(
        &result,
        TerminalResult::Aborted { reason: AbortReason::UnknownCode(_), .. }
    ));

    let harness = Harness::new(
        ScriptedInfraSource::new(vec![Err(SourceError::malformed("rebooting"))]),
        ScriptedAppSource::from_statuses(&["running"]),
    );
    let result = harness.start(None).await;
    assert!(matches!(
        &result,
        TerminalResult::Aborted { reason: AbortReason::UnknownCode(_), .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_publishes_final_snapshot() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Pending]),
        ScriptedAppSource::from_statuses(&["running"]),
    );
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let result = observe_start(
        "i-test",
        &harness.sources(),
        harness.sink.clone(),
        ObserverSettings::new(POLL, None),
        &cancel,
    )
    .await;

    match &result {
        TerminalResult::Cancelled(snapshot) => {
            assert_eq!(snapshot.infra_phase, CanonicalPhase::Starting);
            assert_eq!(snapshot.tick, 3);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }

    let published = harness.sink.snapshots();
    assert_eq!(published.len(), 2);
    assert_eq!(published.last(), Some(result.snapshot()));
    assert_ticks_increase(&published);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_before_first_observation() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Pending]),
        ScriptedAppSource::from_statuses(&["running"]),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = observe_stop(
        "i-test",
        &harness.sources(),
        harness.sink.clone(),
        ObserverSettings::new(POLL, None),
        &cancel,
    )
    .await;

    assert!(matches!(result, TerminalResult::Cancelled(_)));
    assert_eq!(result.snapshot().combined_phase, CanonicalPhase::Running);
    // The interrupted first tick carries the final snapshot
    assert_eq!(result.snapshot().tick, 1);
    assert_eq!(harness.sink.len(), 1);
    assert_eq!(harness.app.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_failures_do_not_stop_convergence() {
    let infra = Arc::new(ScriptedInfraSource::from_states(&[
        InfraState::Pending,
        InfraState::Running,
    ]));
    let app = Arc::new(ScriptedAppSource::from_statuses(&["running"]));
    let sources = StateSources::new(infra, app);

    let result = observe_start(
        "i-test",
        &sources,
        Arc::new(FailingSink),
        ObserverSettings::new(POLL, Some(Duration::from_secs(60))),
        &CancellationToken::new(),
    )
    .await;

    assert!(result.is_converged());
}

#[test]
fn test_observer_starts_in_direction_stage() {
    let sources = StateSources::new(
        Arc::new(ScriptedInfraSource::from_states(&[InfraState::Running])),
        Arc::new(ScriptedAppSource::from_statuses(&["running"])),
    );
    let sink = Arc::new(RecordingSink::new());
    let settings = ObserverSettings::new(POLL, None);

    let start = ConvergenceObserver::new("i-1", Direction::Start, sources.clone(), sink.clone(), settings);
    assert_eq!(start.stage(), Stage::WaitInfra);

    let stop = ConvergenceObserver::new("i-1", Direction::Stop, sources, sink, settings);
    assert_eq!(stop.stage(), Stage::WaitApp);
    assert_ne!(start.operation_id(), stop.operation_id());
}

#[test]
fn test_terminal_result_exit_codes() {
    let snapshot = Snapshot::origin("i-1", Direction::Start);
    assert_eq!(TerminalResult::Converged(snapshot.clone()).exit_code(), 0);
    assert_eq!(
        TerminalResult::Aborted {
            snapshot: snapshot.clone(),
            reason: AbortReason::InfraInvalid
        }
        .exit_code(),
        1
    );
    assert_eq!(TerminalResult::TimedOut(snapshot.clone()).exit_code(), 2);
    assert_eq!(TerminalResult::Cancelled(snapshot).exit_code(), 130);
}

#[test]
fn test_terminal_result_serializes_with_tag() {
    let result = TerminalResult::Aborted {
        snapshot: Snapshot::origin("i-1", Direction::Stop),
        reason: AbortReason::AuthRejected,
    };

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["result"], "aborted");
    assert_eq!(value["reason"], "AuthRejected");
    assert_eq!(value["snapshot"]["resource_id"], "i-1");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_while_query_in_flight() {
    let sink = Arc::new(RecordingSink::new());
    let sources = StateSources::new(
        Arc::new(HangingInfra),
        Arc::new(ScriptedAppSource::from_statuses(&["running"])),
    );
    let started = Instant::now();

    let result = observe_start(
        "i-test",
        &sources,
        sink.clone(),
        ObserverSettings::new(POLL, Some(Duration::from_secs(12))),
        &CancellationToken::new(),
    )
    .await;

    match &result {
        TerminalResult::TimedOut(snapshot) => {
            // Nothing was ever observed, so the origin comes back
            assert_eq!(snapshot.tick, 0);
            assert_eq!(snapshot.combined_phase, CanonicalPhase::Stopped);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_secs(12));
    assert!(sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_app_query_in_flight() {
    let infra = Arc::new(ScriptedInfraSource::from_states(&[InfraState::Running]));
    let sink = Arc::new(RecordingSink::new());
    let sources = StateSources::new(infra.clone(), Arc::new(HangingApp));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let result = observe_start("i-test", &sources, sink.clone(), ObserverSettings::new(POLL, None), &cancel)
        .await;

    match &result {
        TerminalResult::Cancelled(snapshot) => {
            assert_eq!(snapshot.infra_phase, CanonicalPhase::Running);
            assert_eq!(snapshot.app_phase, CanonicalPhase::Stopped);
            // Tick 2 was interrupted mid-query and carries the final snapshot
            assert_eq!(snapshot.tick, 2);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }

    let ticks: Vec<u64> = sink.snapshots().iter().map(|s| s.tick).collect();
    assert_eq!(ticks, vec![1, 2]);
    assert_eq!(infra.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_hands_off_once_app_is_down() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Stopping, InfraState::Stopped]),
        ScriptedAppSource::from_statuses(&["stopping", "stopped"]),
    );
    let handoff = Arc::new(RecordingHandoff::new(&harness, false));

    let result = ConvergenceObserver::new(
        "i-test",
        Direction::Stop,
        harness.sources(),
        harness.sink.clone(),
        ObserverSettings::new(POLL, None),
    )
    .with_handoff(handoff.clone())
    .run(&CancellationToken::new())
    .await;

    assert!(result.is_converged(), "unexpected result: {:?}", result);
    // Both app queries ran before the handoff, no infra query did
    assert_eq!(*handoff.seen.lock(), vec![(0, 2)]);
    assert_eq!(harness.infra.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_handoff_aborts_before_next_stage() {
    let harness = Harness::new(
        ScriptedInfraSource::from_states(&[InfraState::Stopped]),
        ScriptedAppSource::from_statuses(&["stopped"]),
    );
    let handoff = Arc::new(RecordingHandoff::new(&harness, true));

    let result = ConvergenceObserver::new(
        "i-test",
        Direction::Stop,
        harness.sources(),
        harness.sink.clone(),
        ObserverSettings::new(POLL, None),
    )
    .with_handoff(handoff)
    .run(&CancellationToken::new())
    .await;

    match &result {
        TerminalResult::Aborted {
            snapshot,
            reason: AbortReason::HandoffFailed(details),
        } => {
            assert_eq!(snapshot.app_phase, CanonicalPhase::Stopped);
            assert!(details.contains("stop command failed"));
        }
        other => panic!("expected handoff failure, got {:?}", other),
    }
    assert_eq!(harness.infra.calls(), 0);
    assert_eq!(result.exit_code(), 1);
}
