//! Collaborator traits consumed by the job tracker.

use crate::{JobId, JobStatusSnapshot, SubjectId};
use async_trait::async_trait;

/// Starts and cancels analysis jobs for a subject.
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Start a job for the subject.
    ///
    /// Must be safe to call when a non-terminal job already exists: the server then hands back
    /// that job's snapshot instead of creating a second one.
    async fn start_job(&self, subject_id: &SubjectId) -> Result<JobStatusSnapshot, JobApiError>;

    /// Ask the server to cancel the subject's job. The outcome is only observable through a
    /// later status query.
    async fn cancel_job(&self, subject_id: &SubjectId) -> Result<(), JobApiError>;
}

/// Reads server-known job status.
#[async_trait]
pub trait JobStatusQuery: Send + Sync {
    async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatusSnapshot, JobApiError>;

    /// Returns an idle snapshot when the subject has no job.
    async fn get_job_status_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<JobStatusSnapshot, JobApiError>;
}

/// Client-persisted `subject -> last known job id` pointer.
///
/// Synchronous: the pointer must be readable before the first render
/// of a subject's tracker. Losing entries is allowed; the tracker falls back to a subject query.
pub trait PointerStore: Send + Sync {
    fn get(&self, subject_id: &SubjectId) -> Option<JobId>;

    fn set(&self, subject_id: &SubjectId, job_id: &JobId) -> Result<(), PointerStoreError>;

    fn clear(&self, subject_id: &SubjectId) -> Result<(), PointerStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum JobApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("job api error {code}: {message}")]
    Status { code: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("job not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PointerStoreError {
    #[error("pointer store error: {0}")]
    Other(String),
}
