use super::StatusSink;
use crate::error::SinkError;
use crate::snapshot::Snapshot;
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcast fan-out of snapshots for any number of async subscribers
pub struct SnapshotBus {
    sender: broadcast::Sender<Snapshot>,
    debug_logging: bool,
}

impl SnapshotBus {
    /// Create a new bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new bus that logs every snapshot it forwards
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl StatusSink for SnapshotBus {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        if self.debug_logging {
            debug!(
                "Forwarding snapshot tick {} for {} to {} subscribers",
                snapshot.tick,
                snapshot.resource_id,
                self.subscriber_count()
            );
        }
        self.sender
            .send(snapshot.clone())
            .map(|_| ())
            .map_err(|_| SinkError::NoSubscribers)
    }
}
