//! Durable pointer stores: remember which job a subject was last running so a reload can resume it.

mod file;
mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use file::JsonFilePointerStore;
pub use job_types::{JobId, PointerStore, PointerStoreError, SubjectId};
pub use memory::InMemoryPointerStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePointerStore;

/// Storage key for a subject, prefixed with the store's namespace when one is set.
pub(crate) fn pointer_key(namespace: Option<&str>, subject_id: &SubjectId) -> String {
    match namespace {
        Some(ns) => format!("{}:{}", ns, subject_id),
        None => subject_id.to_string(),
    }
}
