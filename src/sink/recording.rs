use super::StatusSink;
use crate::error::SinkError;
use crate::snapshot::Snapshot;
use parking_lot::Mutex;

/// Keeps every published snapshot in memory, for tests and diagnostics
#[derive(Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().clone()
    }

    pub fn last(&self) -> Option<Snapshot> {
        self.snapshots.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}
