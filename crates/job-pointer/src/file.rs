//! JSON file-backed pointer store (survives process restarts).

use crate::pointer_key;
use job_types::{JobId, PointerStore, PointerStoreError, SubjectId};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

type PointerMap = BTreeMap<String, JobId>;

/// One writer lock per file path, shared by every store in the process opened on that path.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

/// Stores all pointers as one JSON object `{ "<key>": "<job id>" }`.
///
/// Writes go to a uniquely named temp file in the same directory which is then renamed over the
/// target, so a crash mid-write leaves the previous contents intact. An unreadable file reads as
/// empty. Stores opened on the same path (e.g. one per namespace) serialize their writes.
pub struct JsonFilePointerStore {
    path: PathBuf,
    namespace: Option<String>,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFilePointerStore {
    pub fn new(path: impl AsRef<Path>, namespace: Option<&str>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            write_lock: path_lock(&path),
            path,
            namespace: namespace.map(str::to_string),
        }
    }

    fn load(&self) -> PointerMap {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PointerMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "pointer file unreadable");
                return PointerMap::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "pointer file corrupt, ignoring");
                PointerMap::new()
            }
        }
    }

    fn store(&self, map: &PointerMap) -> Result<(), PointerStoreError> {
        let body =
            serde_json::to_vec_pretty(map).map_err(|e| PointerStoreError::Other(e.to_string()))?;
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| PointerStoreError::Other(e.to_string()))?;
        tmp.write_all(&body)
            .map_err(|e| PointerStoreError::Other(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| PointerStoreError::Other(e.to_string()))?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<(), PointerStoreError>
    where
        F: FnOnce(&mut PointerMap) -> bool,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| PointerStoreError::Other(format!("failed to acquire lock: {}", e)))?;
        let mut map = self.load();
        if f(&mut map) {
            self.store(&map)?;
        }
        Ok(())
    }
}

impl PointerStore for JsonFilePointerStore {
    fn get(&self, subject_id: &SubjectId) -> Option<JobId> {
        let key = pointer_key(self.namespace.as_deref(), subject_id);
        self.load().remove(&key)
    }

    fn set(&self, subject_id: &SubjectId, job_id: &JobId) -> Result<(), PointerStoreError> {
        let key = pointer_key(self.namespace.as_deref(), subject_id);
        self.update(|map| map.insert(key, job_id.clone()).as_ref() != Some(job_id))
    }

    fn clear(&self, subject_id: &SubjectId) -> Result<(), PointerStoreError> {
        let key = pointer_key(self.namespace.as_deref(), subject_id);
        self.update(|map| map.remove(&key).is_some())
    }
}
