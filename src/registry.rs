//! Per-resource serialization of lifecycle operations.
//!
//! At most one start or stop may be in flight for a resource id. A second
//! request is rejected rather than queued. Within a process the slot is a
//! map entry; across processes it is an exclusive advisory lock on a file
//! named after the resource, holding the direction of the running operation.

use crate::error::{PhasewatchError, Result};
use crate::phase::Direction;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone)]
pub struct OperationRegistry {
    active: Arc<Mutex<HashMap<String, Direction>>>,
    lock_dir: Option<PathBuf>,
}

impl OperationRegistry {
    /// Registry that only serializes operations within this process
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that also serializes against every other process using
    /// the same `lock_dir`
    pub fn with_lock_dir<P: Into<PathBuf>>(lock_dir: P) -> Self {
        Self {
            active: Arc::default(),
            lock_dir: Some(lock_dir.into()),
        }
    }

    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    /// Claim the slot for `resource_id`. The slot is released when the
    /// returned guard is dropped.
    pub fn try_acquire(&self, resource_id: &str, direction: Direction) -> Result<OperationGuard> {
        let mut active = self.active.lock();
        if let Some(current) = active.get(resource_id) {
            return Err(PhasewatchError::OperationInProgress {
                resource: resource_id.to_string(),
                active: *current,
            });
        }

        let lock = match &self.lock_dir {
            Some(dir) => Some(lock_resource(dir, resource_id, direction)?),
            None => None,
        };

        active.insert(resource_id.to_string(), direction);
        debug!("Acquired {} slot for {}", direction, resource_id);

        Ok(OperationGuard {
            registry: self.clone(),
            resource_id: resource_id.to_string(),
            direction,
            lock,
        })
    }

    /// Direction of the operation this process is running on `resource_id`
    pub fn active(&self, resource_id: &str) -> Option<Direction> {
        self.active.lock().get(resource_id).copied()
    }

    pub fn is_busy(&self, resource_id: &str) -> bool {
        self.active(resource_id).is_some()
    }

    fn release(&self, resource_id: &str) {
        self.active.lock().remove(resource_id);
    }
}

/// Take the exclusive lock on the resource's lock file, or report who holds it
fn lock_resource(dir: &Path, resource_id: &str, direction: Direction) -> Result<File> {
    fs::create_dir_all(dir)?;
    let path = lock_path(dir, resource_id);
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let active = match holder.trim() {
                "start" => Direction::Start,
                "stop" => Direction::Stop,
                other => {
                    warn!("Lock file {} names no direction: '{}'", path.display(), other);
                    direction
                }
            };
            return Err(PhasewatchError::OperationInProgress {
                resource: resource_id.to_string(),
                active,
            });
        }
        Err(e) => return Err(e.into()),
    }

    file.set_len(0)?;
    file.write_all(direction.to_string().as_bytes())?;
    file.flush()?;
    debug!("Locked {}", path.display());
    Ok(file)
}

fn lock_path(dir: &Path, resource_id: &str) -> PathBuf {
    let name: String = resource_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    dir.join(format!("{}.lock", name))
}

/// Holds a resource's operation slot
#[derive(Debug)]
pub struct OperationGuard {
    registry: OperationRegistry,
    resource_id: String,
    direction: Direction,
    lock: Option<File>,
}

impl OperationGuard {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some(file) = self.lock.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("Failed to unlock {} slot for {}: {}", self.direction, self.resource_id, e);
            }
        }
        self.registry.release(&self.resource_id);
        debug!("Released {} slot for {}", self.direction, self.resource_id);
    }
}
