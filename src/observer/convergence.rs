use super::outcome::{AbortReason, ObserverSettings, TerminalResult};
use crate::error::{NormalizeError, Result};
use crate::normalizer::{normalize_app, normalize_infra};
use crate::phase::{CanonicalPhase, Direction, FailureKind};
use crate::sink::StatusSink;
use crate::snapshot::{ChangeDetector, Snapshot};
use crate::sources::{AppStateSource, InfraStateSource};
use std::sync::Arc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// The two state sources an observer polls
#[derive(Clone)]
pub struct StateSources {
    pub infra: Arc<dyn InfraStateSource>,
    pub app: Arc<dyn AppStateSource>,
}

impl StateSources {
    pub fn new(infra: Arc<dyn InfraStateSource>, app: Arc<dyn AppStateSource>) -> Self {
        Self { infra, app }
    }
}

/// Work run once between the two stages, after the first has converged and
/// before the second is polled. A stop uses it to request the resource stop
/// only once the application is down.
#[async_trait::async_trait]
pub trait StageHandoff: Send + Sync {
    async fn handoff(&self, resource_id: &str, direction: Direction) -> Result<()>;
}

/// Which side the observer is currently polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WaitInfra,
    WaitApp,
}

enum TickOutcome {
    /// Transient query failure; nothing was observed this tick
    Skipped,
    Observed(Snapshot),
    Aborted(Snapshot, AbortReason),
}

enum Pause {
    Elapsed,
    Expired,
    Cancelled,
}

/// Drives one `(resource, direction)` operation from first poll to terminal
/// result. Consumed by [`ConvergenceObserver::run`].
pub struct ConvergenceObserver {
    resource_id: String,
    direction: Direction,
    sources: StateSources,
    sink: Arc<dyn StatusSink>,
    settings: ObserverSettings,
    handoff: Option<Arc<dyn StageHandoff>>,
    operation_id: Uuid,
    stage: Stage,
    tick: u64,
    last: Option<Snapshot>,
    detector: ChangeDetector,
}

impl ConvergenceObserver {
    pub fn new(
        resource_id: &str,
        direction: Direction,
        sources: StateSources,
        sink: Arc<dyn StatusSink>,
        settings: ObserverSettings,
    ) -> Self {
        // Start brings the resource up before probing the app; stop takes the
        // app down before the resource.
        let stage = match direction {
            Direction::Start => Stage::WaitInfra,
            Direction::Stop => Stage::WaitApp,
        };

        Self {
            resource_id: resource_id.to_string(),
            direction,
            sources,
            sink,
            settings,
            handoff: None,
            operation_id: Uuid::new_v4(),
            stage,
            tick: 0,
            last: None,
            detector: ChangeDetector::new(),
        }
    }

    pub fn with_handoff(mut self, handoff: Arc<dyn StageHandoff>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Poll until convergence, abort, timeout or cancellation
    pub async fn run(mut self, cancel: &CancellationToken) -> TerminalResult {
        let span = info_span!(
            "observe",
            operation = %self.operation_id,
            resource = %self.resource_id,
            direction = %self.direction
        );
        async move {
            let result = self.drive(cancel).await;
            match &result {
                TerminalResult::Converged(_) => info!("{}", result),
                TerminalResult::Aborted { .. } | TerminalResult::TimedOut(_) => warn!("{}", result),
                TerminalResult::Cancelled(_) => info!("{}", result),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> TerminalResult {
        let deadline = self.settings.timeout.map(|timeout| Instant::now() + timeout);

        info!(
            "Waiting for {} to reach {} (poll every {:?}, timeout {:?})",
            self.resource_id,
            self.direction.target(),
            self.settings.poll_interval,
            self.settings.timeout
        );

        loop {
            self.tick += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(true),
                _ = wait_for_deadline(deadline) => return self.timed_out(),
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                TickOutcome::Skipped => {}
                TickOutcome::Aborted(snapshot, reason) => {
                    return self.aborted(snapshot, reason);
                }
                TickOutcome::Observed(snapshot) => {
                    self.emit(&snapshot);
                    self.last = Some(snapshot.clone());
                    if let Some(result) = self.advance(snapshot).await {
                        return result;
                    }
                }
            }

            match self.pause(deadline, cancel).await {
                Pause::Elapsed => {}
                Pause::Expired => return self.timed_out(),
                Pause::Cancelled => return self.cancelled(false),
            }
        }
    }

    async fn poll_once(&self) -> TickOutcome {
        match self.stage {
            Stage::WaitInfra => self.poll_infra().await,
            Stage::WaitApp => self.poll_app().await,
        }
    }

    async fn poll_infra(&self) -> TickOutcome {
        // Only the infra side is live here; the app is either not yet probed
        // (start) or already down (stop).
        let app_phase = CanonicalPhase::Stopped;

        let code = match self.sources.infra.query(&self.resource_id).await {
            Ok(code) => code,
            Err(e) if e.is_transient() => {
                warn!(
                    "Tick {}: {} infra query failed, retrying next tick: {}",
                    self.tick,
                    self.sources.infra.source_name(),
                    e
                );
                return TickOutcome::Skipped;
            }
            Err(e) => {
                error!("Tick {}: infra source broke its contract: {}", self.tick, e);
                return TickOutcome::Aborted(
                    self.snapshot(CanonicalPhase::Invalid, app_phase),
                    AbortReason::UnknownCode(e.to_string()),
                );
            }
        };

        match normalize_infra(code) {
            Ok(infra_phase) => TickOutcome::Observed(self.snapshot(infra_phase, app_phase)),
            Err(e) => {
                error!("Tick {}: {}", self.tick, e);
                TickOutcome::Aborted(
                    self.snapshot(CanonicalPhase::Invalid, app_phase),
                    AbortReason::UnknownCode(e.to_string()),
                )
            }
        }
    }

    async fn poll_app(&self) -> TickOutcome {
        // Start only gets here once the resource is up; stop polls the app
        // while the resource is still up.
        let infra_phase = CanonicalPhase::Running;

        let probe = self
            .sources
            .app
            .query(&self.resource_id, self.direction)
            .await;
        if let Err(kind) = &probe {
            debug!("Tick {}: app probe failed: {}", self.tick, kind);
        }

        let reason = match normalize_app(&probe, self.direction) {
            Ok(app_phase) => return TickOutcome::Observed(self.snapshot(infra_phase, app_phase)),
            Err(NormalizeError::Unrecoverable(FailureKind::AuthRejected)) => {
                AbortReason::AuthRejected
            }
            Err(NormalizeError::Unrecoverable(kind)) => AbortReason::Unrecoverable(kind),
            Err(e) => {
                error!("Tick {}: {}", self.tick, e);
                AbortReason::UnknownCode(e.to_string())
            }
        };

        TickOutcome::Aborted(self.snapshot(infra_phase, CanonicalPhase::Invalid), reason)
    }

    fn snapshot(&self, infra_phase: CanonicalPhase, app_phase: CanonicalPhase) -> Snapshot {
        Snapshot::new(
            &self.resource_id,
            self.direction,
            infra_phase,
            app_phase,
            self.tick,
        )
    }

    /// Move the state machine forward after an observed snapshot
    async fn advance(&mut self, snapshot: Snapshot) -> Option<TerminalResult> {
        if snapshot.is_invalid() {
            let reason = if snapshot.infra_phase == CanonicalPhase::Invalid {
                AbortReason::InfraInvalid
            } else {
                AbortReason::AppInvalid
            };
            return Some(TerminalResult::Aborted { snapshot, reason });
        }

        match (self.direction, self.stage) {
            (Direction::Start, Stage::WaitInfra) if snapshot.infra_phase == CanonicalPhase::Running => {
                info!("Instance {} is running, waiting for the application", self.resource_id);
                if let Some(result) = self.hand_off(&snapshot).await {
                    return Some(result);
                }
                self.stage = Stage::WaitApp;
            }
            (Direction::Stop, Stage::WaitApp) if snapshot.app_phase == CanonicalPhase::Stopped => {
                info!("Application on {} is down, waiting for the instance", self.resource_id);
                if let Some(result) = self.hand_off(&snapshot).await {
                    return Some(result);
                }
                self.stage = Stage::WaitInfra;
            }
            (Direction::Start, Stage::WaitApp) | (Direction::Stop, Stage::WaitInfra)
                if snapshot.combined_phase == self.direction.target() =>
            {
                return Some(TerminalResult::Converged(snapshot));
            }
            _ => {}
        }

        None
    }

    /// Run the handoff, if any. Not raced against cancellation or the
    /// deadline: a half-issued lifecycle request is worse than a late one.
    async fn hand_off(&self, snapshot: &Snapshot) -> Option<TerminalResult> {
        let handoff = self.handoff.as_ref()?;
        match handoff.handoff(&self.resource_id, self.direction).await {
            Ok(()) => None,
            Err(e) => {
                error!("Tick {}: handoff to the next stage failed: {}", self.tick, e);
                Some(TerminalResult::Aborted {
                    snapshot: snapshot.clone(),
                    reason: AbortReason::HandoffFailed(e.to_string()),
                })
            }
        }
    }

    async fn pause(&self, deadline: Option<Instant>, cancel: &CancellationToken) -> Pause {
        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Pause::Expired;
                }
                self.settings.poll_interval.min(deadline - now)
            }
            None => self.settings.poll_interval,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Pause::Cancelled,
            _ = sleep(wait) => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    Pause::Expired
                } else {
                    Pause::Elapsed
                }
            }
        }
    }

    /// Publish `snapshot` if its phases differ from the last published ones.
    /// Publish failures are logged and otherwise ignored.
    fn emit(&mut self, snapshot: &Snapshot) {
        if self.detector.observe(snapshot) {
            self.deliver(snapshot);
        }
    }

    fn deliver(&self, snapshot: &Snapshot) {
        if let Err(e) = self.sink.publish(snapshot) {
            warn!("Failed to publish snapshot for tick {}: {}", snapshot.tick, e);
        }
    }

    fn last_or_origin(&self) -> Snapshot {
        self.last
            .clone()
            .unwrap_or_else(|| Snapshot::origin(&self.resource_id, self.direction))
    }

    fn aborted(&mut self, snapshot: Snapshot, reason: AbortReason) -> TerminalResult {
        self.emit(&snapshot);
        self.last = Some(snapshot.clone());
        TerminalResult::Aborted { snapshot, reason }
    }

    fn timed_out(&self) -> TerminalResult {
        TerminalResult::TimedOut(self.last_or_origin())
    }

    /// Publish one final snapshot so the sink is never left mid-update. A
    /// tick interrupted mid-query produced nothing and carries the snapshot;
    /// otherwise it goes out at the next tick.
    fn cancelled(&mut self, tick_in_progress: bool) -> TerminalResult {
        if !tick_in_progress {
            self.tick += 1;
        }
        let snapshot = self.last_or_origin().restamped(self.tick);
        self.detector.force(&snapshot);
        self.deliver(&snapshot);
        TerminalResult::Cancelled(snapshot)
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
