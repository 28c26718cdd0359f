//! In-memory pointer store (process lifetime only).

use crate::pointer_key;
use job_types::{JobId, PointerStore, PointerStoreError, SubjectId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Pointer store backed by a map.
pub struct InMemoryPointerStore {
    /// namespaced subject key -> job id
    pointers: RwLock<HashMap<String, JobId>>,
    namespace: Option<String>,
}

impl InMemoryPointerStore {
    pub fn new(namespace: Option<&str>) -> Self {
        Self {
            pointers: RwLock::new(HashMap::new()),
            namespace: namespace.map(str::to_string),
        }
    }

    fn key(&self, subject_id: &SubjectId) -> String {
        pointer_key(self.namespace.as_deref(), subject_id)
    }
}

impl Default for InMemoryPointerStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PointerStore for InMemoryPointerStore {
    fn get(&self, subject_id: &SubjectId) -> Option<JobId> {
        let guard = self.pointers.read().ok()?;
        guard.get(&self.key(subject_id)).cloned()
    }

    fn set(&self, subject_id: &SubjectId, job_id: &JobId) -> Result<(), PointerStoreError> {
        let mut guard = self
            .pointers
            .write()
            .map_err(|e| PointerStoreError::Other(format!("failed to acquire lock: {}", e)))?;
        guard.insert(self.key(subject_id), job_id.clone());
        Ok(())
    }

    fn clear(&self, subject_id: &SubjectId) -> Result<(), PointerStoreError> {
        let mut guard = self
            .pointers
            .write()
            .map_err(|e| PointerStoreError::Other(format!("failed to acquire lock: {}", e)))?;
        guard.remove(&self.key(subject_id));
        Ok(())
    }
}
