use crate::normalizer::combine;
use crate::phase::{CanonicalPhase, Direction};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One normalized observation of both sources at a given tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub resource_id: String,
    pub direction: Direction,
    pub infra_phase: CanonicalPhase,
    pub app_phase: CanonicalPhase,
    pub combined_phase: CanonicalPhase,
    pub tick: u64,
    pub observed_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        resource_id: &str,
        direction: Direction,
        infra_phase: CanonicalPhase,
        app_phase: CanonicalPhase,
        tick: u64,
    ) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            direction,
            infra_phase,
            app_phase,
            combined_phase: combine(infra_phase, app_phase, direction),
            tick,
            observed_at: Utc::now(),
        }
    }

    /// Snapshot standing in for "nothing observed yet": both sides at the
    /// direction's starting extreme, tick 0
    pub fn origin(resource_id: &str, direction: Direction) -> Self {
        Self::new(
            resource_id,
            direction,
            direction.origin(),
            direction.origin(),
            0,
        )
    }

    /// The tuple used for change detection. Raw codes and timestamps never
    /// take part in it.
    pub fn phases(&self) -> (CanonicalPhase, CanonicalPhase, CanonicalPhase) {
        (self.infra_phase, self.app_phase, self.combined_phase)
    }

    pub fn is_invalid(&self) -> bool {
        self.combined_phase == CanonicalPhase::Invalid
    }

    /// Copy of this snapshot re-stamped at a later tick
    pub fn restamped(&self, tick: u64) -> Self {
        Self {
            tick,
            observed_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Remembers the last published phase tuple and filters repeats
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<(CanonicalPhase, CanonicalPhase, CanonicalPhase)>,
    last_tick: Option<u64>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `snapshot` should be published, recording it if so
    pub fn observe(&mut self, snapshot: &Snapshot) -> bool {
        if self.last_tick.is_some_and(|tick| snapshot.tick <= tick) {
            return false;
        }
        if self.last == Some(snapshot.phases()) {
            return false;
        }
        self.last = Some(snapshot.phases());
        self.last_tick = Some(snapshot.tick);
        true
    }

    /// Record a publish that bypassed change detection
    pub fn force(&mut self, snapshot: &Snapshot) {
        self.last = Some(snapshot.phases());
        self.last_tick = Some(snapshot.tick);
    }

    pub fn last_published_tick(&self) -> Option<u64> {
        self.last_tick
    }
}
