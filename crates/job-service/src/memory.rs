//! In-memory job service: single queue + one worker, job state in a map.

use crate::{Analyzer, JobApiError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_types::{JobControl, JobId, JobState, JobStatusQuery, JobStatusSnapshot, SubjectId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

struct JobRecord {
    subject_id: SubjectId,
    snapshot: JobStatusSnapshot,
    cancel: Arc<Notify>,
}

#[derive(Default)]
struct Jobs {
    records: HashMap<JobId, JobRecord>,
    /// subject -> most recent job
    latest: HashMap<SubjectId, JobId>,
}

impl Jobs {
    fn active_for(&self, subject_id: &SubjectId) -> Option<&JobRecord> {
        self.latest
            .get(subject_id)
            .and_then(|id| self.records.get(id))
            .filter(|r| r.snapshot.state.is_active())
    }

    fn finish(
        &mut self,
        job_id: &JobId,
        outcome: Result<serde_json::Value, String>,
        now: DateTime<Utc>,
    ) {
        let Some(record) = self.records.get_mut(job_id) else {
            return;
        };
        if record.snapshot.state != JobState::Processing {
            tracing::debug!(job_id = %job_id, state = %record.snapshot.state, "dropping late analysis result");
            return;
        }
        let s = &mut record.snapshot;
        s.completed_at = Some(now);
        match outcome {
            Ok(result) => {
                s.state = JobState::Completed;
                s.result = Some(result);
            }
            Err(error) => {
                s.state = JobState::Failed;
                s.error = Some(error);
            }
        }
        tracing::info!(job_id = %job_id, subject_id = %record.subject_id, state = %s.state, "analysis finished");
    }
}

/// Snapshot as served to clients, with `elapsedSeconds` filled in.
fn served(snapshot: &JobStatusSnapshot, now: DateTime<Utc>) -> JobStatusSnapshot {
    let mut out = snapshot.clone();
    if let Some(started) = snapshot.started_at {
        let end = snapshot.completed_at.unwrap_or(now);
        out.elapsed_seconds = Some((end - started).num_seconds().max(0) as u64);
    }
    out
}

/// In-memory job service: queues start requests, one worker runs the analyzer and updates status.
pub struct InMemoryJobService {
    jobs: Arc<RwLock<Jobs>>,
    tx: mpsc::UnboundedSender<JobId>,
    analyzer: Arc<dyn Analyzer>,
}

impl InMemoryJobService {
    /// Create the service and spawn its worker on the current runtime.
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        let jobs: Arc<RwLock<Jobs>> = Arc::new(RwLock::new(Jobs::default()));
        let (tx, mut rx) = mpsc::unbounded_channel::<JobId>();

        let jobs_clone = Arc::clone(&jobs);
        let worker_analyzer = Arc::clone(&analyzer);
        tokio::spawn(async move {
            while let Some(job_id) = rx.recv().await {
                let (subject_id, cancel) = {
                    let mut guard = jobs_clone.write().await;
                    let Some(record) = guard.records.get_mut(&job_id) else {
                        continue;
                    };
                    if record.snapshot.state != JobState::Queued {
                        // cancelled while waiting in the queue
                        continue;
                    }
                    record.snapshot.state = JobState::Processing;
                    record.snapshot.started_at = Some(Utc::now());
                    tracing::info!(job_id = %job_id, subject_id = %record.subject_id, "analysis started");
                    (record.subject_id.clone(), Arc::clone(&record.cancel))
                };

                let outcome = tokio::select! {
                    outcome = worker_analyzer.analyze(&subject_id) => outcome,
                    _ = cancel.notified() => {
                        tracing::info!(job_id = %job_id, "analysis interrupted by cancel");
                        continue;
                    }
                };
                jobs_clone.write().await.finish(&job_id, outcome, Utc::now());
            }
        });

        Self { jobs, tx, analyzer }
    }
}

#[async_trait]
impl JobControl for InMemoryJobService {
    async fn start_job(&self, subject_id: &SubjectId) -> Result<JobStatusSnapshot, JobApiError> {
        let plan = self.analyzer.plan(subject_id).await;
        let now = Utc::now();
        let job_id = {
            let mut guard = self.jobs.write().await;
            if let Some(existing) = guard.active_for(subject_id) {
                tracing::debug!(subject_id = %subject_id, job_id = ?existing.snapshot.job_id, "job already running");
                return Ok(served(&existing.snapshot, now));
            }
            let job_id = JobId::new(Uuid::new_v4().to_string());
            let snapshot = JobStatusSnapshot {
                job_id: Some(job_id.clone()),
                state: JobState::Queued,
                report_count: plan.report_count,
                estimated_seconds: plan.estimated_seconds,
                ..Default::default()
            };
            guard.records.insert(
                job_id.clone(),
                JobRecord {
                    subject_id: subject_id.clone(),
                    snapshot,
                    cancel: Arc::new(Notify::new()),
                },
            );
            guard.latest.insert(subject_id.clone(), job_id.clone());
            job_id
        };
        self.tx.send(job_id.clone()).map_err(|_| JobApiError::Status {
            code: 503,
            message: "worker channel closed".to_string(),
        })?;
        tracing::info!(subject_id = %subject_id, job_id = %job_id, "analysis job queued");
        self.get_job_status(&job_id).await
    }

    async fn cancel_job(&self, subject_id: &SubjectId) -> Result<(), JobApiError> {
        let mut guard = self.jobs.write().await;
        let Some(job_id) = guard.latest.get(subject_id).cloned() else {
            return Ok(());
        };
        if let Some(record) = guard.records.get_mut(&job_id) {
            if record.snapshot.state.is_active() {
                record.snapshot.state = JobState::Cancelled;
                record.snapshot.completed_at = Some(Utc::now());
                record.cancel.notify_one();
                tracing::info!(subject_id = %subject_id, job_id = %job_id, "analysis cancelled");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobStatusQuery for InMemoryJobService {
    async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatusSnapshot, JobApiError> {
        let guard = self.jobs.read().await;
        guard
            .records
            .get(job_id)
            .map(|r| served(&r.snapshot, Utc::now()))
            .ok_or_else(|| JobApiError::NotFound(job_id.to_string()))
    }

    async fn get_job_status_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<JobStatusSnapshot, JobApiError> {
        let guard = self.jobs.read().await;
        Ok(guard
            .latest
            .get(subject_id)
            .and_then(|id| guard.records.get(id))
            .map(|r| served(&r.snapshot, Utc::now()))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AnalysisPlan, FixedAnalyzer};
    use std::time::Duration;

    struct FailingAnalyzer;

    #[async_trait]
    impl Analyzer for FailingAnalyzer {
        async fn plan(&self, _subject_id: &SubjectId) -> AnalysisPlan {
            AnalysisPlan {
                report_count: 1,
                estimated_seconds: None,
            }
        }

        async fn analyze(&self, _subject_id: &SubjectId) -> Result<serde_json::Value, String> {
            Err("report 1 is not a readable PDF".to_string())
        }
    }

    fn service(per_report_secs: u64) -> InMemoryJobService {
        InMemoryJobService::new(Arc::new(FixedAnalyzer::new(
            Duration::from_secs(per_report_secs),
            2,
        )))
    }

    async fn wait_for_state(
        svc: &InMemoryJobService,
        job_id: &JobId,
        state: JobState,
    ) -> JobStatusSnapshot {
        for _ in 0..200 {
            let s = svc.get_job_status(job_id).await.unwrap();
            if s.state == state {
                return s;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("job never reached {state}");
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_to_completion() {
        let svc = service(5);
        let p1 = SubjectId::from("p1");
        let started = svc.start_job(&p1).await.unwrap();
        assert_eq!(started.state, JobState::Queued);
        assert_eq!(started.report_count, 2);
        assert_eq!(started.estimated_seconds, Some(10));
        let job_id = started.job_id.unwrap();

        let done = wait_for_state(&svc, &job_id, JobState::Completed).await;
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert_eq!(done.result.unwrap()["reportsAnalyzed"], 2);

        let by_subject = svc.get_job_status_for_subject(&p1).await.unwrap();
        assert_eq!(by_subject.job_id, Some(job_id));
        assert_eq!(by_subject.state, JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_while_active() {
        let svc = service(60);
        let p1 = SubjectId::from("p1");
        let a = svc.start_job(&p1).await.unwrap();
        let b = svc.start_job(&p1).await.unwrap();
        assert_eq!(a.job_id, b.job_id);

        // a different subject gets its own job
        let c = svc.start_job(&SubjectId::from("p2")).await.unwrap();
        assert_ne!(a.job_id, c.job_id);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_and_allows_restart() {
        let svc = service(60);
        let p1 = SubjectId::from("p1");
        let first = svc.start_job(&p1).await.unwrap().job_id.unwrap();
        wait_for_state(&svc, &first, JobState::Processing).await;

        svc.cancel_job(&p1).await.unwrap();
        let s = svc.get_job_status(&first).await.unwrap();
        assert_eq!(s.state, JobState::Cancelled);

        // late analyzer output must not resurrect the job
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(
            svc.get_job_status(&first).await.unwrap().state,
            JobState::Cancelled
        );

        let second = svc.start_job(&p1).await.unwrap().job_id.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_reported_with_message() {
        let svc = InMemoryJobService::new(Arc::new(FailingAnalyzer));
        let job_id = svc
            .start_job(&SubjectId::from("p1"))
            .await
            .unwrap()
            .job_id
            .unwrap();
        let s = wait_for_state(&svc, &job_id, JobState::Failed).await;
        assert_eq!(s.error.as_deref(), Some("report 1 is not a readable PDF"));
    }

    #[tokio::test]
    async fn unknown_lookups() {
        let svc = service(1);
        let err = svc.get_job_status(&JobId::from("nope")).await.unwrap_err();
        assert!(matches!(err, JobApiError::NotFound(_)));
        let s = svc
            .get_job_status_for_subject(&SubjectId::from("nobody"))
            .await
            .unwrap();
        assert!(s.is_empty());
        // cancelling nothing is fine
        svc.cancel_job(&SubjectId::from("nobody")).await.unwrap();
    }
}
