mod bus;
mod console;
mod recording;

use crate::error::SinkError;
use crate::snapshot::Snapshot;
use std::sync::Arc;
use tracing::{info, warn};

pub use bus::SnapshotBus;
pub use console::{phase_marker, render_snapshot, status_colour, ConsoleFormat, ConsoleSink};
pub use recording::RecordingSink;

/// Receives progress snapshots. Implementations must be cheap relative to
/// the poll cadence; the observer never retries a failed publish.
pub trait StatusSink: Send + Sync {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError>;
}

/// Emits every snapshot as a structured log event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        info!(
            resource = %snapshot.resource_id,
            direction = %snapshot.direction,
            tick = snapshot.tick,
            infra = %snapshot.infra_phase,
            app = %snapshot.app_phase,
            combined = %snapshot.combined_phase,
            "Convergence progress"
        );
        Ok(())
    }
}

/// Publishes to every child sink, even when an earlier one fails
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StatusSink for FanoutSink {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(snapshot) {
                warn!("Snapshot sink failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
