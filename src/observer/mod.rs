//! Dual-source convergence observer.
//!
//! One observer polls the infrastructure and application sources in the order
//! dictated by the direction, normalizes each answer, publishes changed
//! snapshots and stops on convergence, abort, timeout or cancellation.

mod convergence;
mod outcome;

#[cfg(test)]
mod tests;

use crate::phase::Direction;
use crate::sink::StatusSink;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use convergence::{ConvergenceObserver, Stage, StageHandoff, StateSources};
pub use outcome::{AbortReason, ObserverSettings, TerminalResult};

/// Bring `resource_id` fully up: instance first, then application
pub async fn observe_start(
    resource_id: &str,
    sources: &StateSources,
    sink: Arc<dyn StatusSink>,
    settings: ObserverSettings,
    cancel: &CancellationToken,
) -> TerminalResult {
    ConvergenceObserver::new(resource_id, Direction::Start, sources.clone(), sink, settings)
        .run(cancel)
        .await
}

/// Bring `resource_id` fully down: application first, then instance
pub async fn observe_stop(
    resource_id: &str,
    sources: &StateSources,
    sink: Arc<dyn StatusSink>,
    settings: ObserverSettings,
    cancel: &CancellationToken,
) -> TerminalResult {
    ConvergenceObserver::new(resource_id, Direction::Stop, sources.clone(), sink, settings)
        .run(cancel)
        .await
}
