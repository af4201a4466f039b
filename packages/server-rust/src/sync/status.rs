//! Task status store: latest snapshot of each export or import task, keyed by
//! request id and polled by callers.

use entityvc_core::{VersionCreationResult, VersionLoadResult};
use quick_cache::sync::Cache;
use uuid::Uuid;

/// Snapshot of one background task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Export(VersionCreationResult),
    Import(VersionLoadResult),
}

/// Bounded last-writer-wins store of task snapshots.
///
/// Old entries are evicted once `capacity` is exceeded; polling an evicted
/// task behaves like polling an unknown one.
pub struct TaskStatusStore {
    cache: Cache<Uuid, TaskStatus>,
}

impl TaskStatusStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Cache::new(capacity.max(1)),
        }
    }

    pub fn put_export(&self, request_id: Uuid, result: VersionCreationResult) {
        self.cache.insert(request_id, TaskStatus::Export(result));
    }

    pub fn put_import(&self, request_id: Uuid, result: VersionLoadResult) {
        self.cache.insert(request_id, TaskStatus::Import(result));
    }

    #[must_use]
    pub fn export_status(&self, request_id: Uuid) -> Option<VersionCreationResult> {
        match self.cache.get(&request_id)? {
            TaskStatus::Export(result) => Some(result),
            TaskStatus::Import(_) => None,
        }
    }

    #[must_use]
    pub fn import_status(&self, request_id: Uuid) -> Option<VersionLoadResult> {
        match self.cache.get(&request_id)? {
            TaskStatus::Import(result) => Some(result),
            TaskStatus::Export(_) => None,
        }
    }

    pub fn remove(&self, request_id: Uuid) -> bool {
        self.cache.remove(&request_id).is_some()
    }
}
