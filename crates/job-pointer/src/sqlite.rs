//! SQLite-backed pointer store.

use crate::pointer_key;
use job_types::{JobId, PointerStore, PointerStoreError, SubjectId};
use std::path::Path;

/// SQLite-backed pointer store for persistence.
pub struct SqlitePointerStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
    namespace: Option<String>,
}

impl SqlitePointerStore {
    /// Open (or create) the pointer database at the given path.
    pub fn new(path: impl AsRef<Path>, namespace: Option<&str>) -> Result<Self, PointerStoreError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| PointerStoreError::Other(e.to_string()))?;
        Self::with_connection(conn, namespace)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory(namespace: Option<&str>) -> Result<Self, PointerStoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| PointerStoreError::Other(e.to_string()))?;
        Self::with_connection(conn, namespace)
    }

    fn with_connection(
        conn: rusqlite::Connection,
        namespace: Option<&str>,
    ) -> Result<Self, PointerStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_pointers (
                subject_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| PointerStoreError::Other(e.to_string()))?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            namespace: namespace.map(str::to_string),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, PointerStoreError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PointerStoreError::Other(format!("failed to acquire lock: {}", e)))?;
        f(&conn).map_err(|e| PointerStoreError::Other(e.to_string()))
    }
}

impl PointerStore for SqlitePointerStore {
    fn get(&self, subject_id: &SubjectId) -> Option<JobId> {
        let key = pointer_key(self.namespace.as_deref(), subject_id);
        let result = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT job_id FROM job_pointers WHERE subject_id = ?1")?;
            match stmt.query_row([&key], |row| row.get::<_, String>(0)) {
                Ok(id) => Ok(Some(JobId::from(id))),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        });
        match result {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(subject_id = %subject_id, error = %e, "pointer lookup failed");
                None
            }
        }
    }

    fn set(&self, subject_id: &SubjectId, job_id: &JobId) -> Result<(), PointerStoreError> {
        let key = pointer_key(self.namespace.as_deref(), subject_id);
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO job_pointers (subject_id, job_id, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, job_id.as_str(), now],
            )
        })?;
        Ok(())
    }

    fn clear(&self, subject_id: &SubjectId) -> Result<(), PointerStoreError> {
        let key = pointer_key(self.namespace.as_deref(), subject_id);
        self.with_conn(|conn| {
            conn.execute("DELETE FROM job_pointers WHERE subject_id = ?1", [&key])
        })?;
        Ok(())
    }
}
