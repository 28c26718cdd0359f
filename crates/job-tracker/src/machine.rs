//! Synchronous tracker state machine.
//!
//! `TrackerCore` never performs I/O itself except for the (synchronous) pointer store. Every
//! command returns the `Request` the caller should send to the collaborators, and every answer
//! comes back through [`TrackerCore::apply`] / [`TrackerCore::fail`] together with the request it
//! answers. That request carries the selection generation and, for polls, the job id that was
//! asked about; both are what the stale-response guards compare against.

use crate::progress::stage;
use crate::tracker::TrackerView;
use chrono::{DateTime, Utc};
use job_types::{JobApiError, JobId, JobState, JobStatusSnapshot, PointerStore, SubjectId};
use std::sync::Arc;

/// Why a request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Resolving truth after a subject was selected.
    Reconcile,
    Start,
    Poll,
    Cancel,
}

/// Which collaborator call to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Start(SubjectId),
    Cancel(SubjectId),
    StatusByJob(JobId),
    StatusBySubject(SubjectId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Selection generation the request belongs to.
    pub generation: u64,
    pub purpose: Purpose,
    pub query: Query,
}

/// What [`TrackerCore::apply`] did with a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Stale: a previous selection, or a job that is no longer tracked.
    Discarded,
    Applied,
    /// Applied, and another query is needed to finish reconciliation.
    FollowUp(Request),
}

/// What is known about one job.
#[derive(Debug, Clone, PartialEq)]
struct Progress {
    job_id: JobId,
    state: JobState,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    server_elapsed: Option<u64>,
    estimated_seconds: Option<u64>,
    report_count: u32,
}

impl Progress {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Queued,
            started_at: None,
            completed_at: None,
            server_elapsed: None,
            estimated_seconds: None,
            report_count: 0,
        }
    }

    /// Fold a snapshot for the same job in. Timestamps keep their first value and the server's
    /// elapsed count never decreases.
    fn merge(&mut self, snapshot: &JobStatusSnapshot) {
        self.state = snapshot.state;
        self.started_at = self.started_at.or(snapshot.started_at);
        self.completed_at = self.completed_at.or(snapshot.completed_at);
        if let Some(e) = snapshot.elapsed_seconds {
            self.server_elapsed = Some(self.server_elapsed.map_or(e, |prev| prev.max(e)));
        }
        if snapshot.estimated_seconds.is_some() {
            self.estimated_seconds = snapshot.estimated_seconds;
        }
        if snapshot.report_count > 0 {
            self.report_count = snapshot.report_count;
        }
    }

    fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        if let Some(e) = self.server_elapsed {
            return e;
        }
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = match self.completed_at {
            Some(done) if self.state.is_terminal() => done,
            _ => now,
        };
        (end - started).num_seconds().max(0) as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Idle,
    /// Start sent, no job id known yet. Shown as `queued`.
    Starting,
    Active(Progress),
    Completed {
        progress: Progress,
        result: Option<serde_json::Value>,
    },
    Failed {
        progress: Progress,
        error: String,
    },
    Cancelled(Progress),
}

impl Phase {
    fn progress(&self) -> Option<&Progress> {
        match self {
            Phase::Idle | Phase::Starting => None,
            Phase::Active(p) | Phase::Cancelled(p) => Some(p),
            Phase::Completed { progress, .. } | Phase::Failed { progress, .. } => Some(progress),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Completed { .. } | Phase::Failed { .. } | Phase::Cancelled(_)
        )
    }
}

/// Job tracker state for the subject currently under view.
pub struct TrackerCore {
    pointers: Arc<dyn PointerStore>,
    subject: Option<SubjectId>,
    generation: u64,
    phase: Phase,
    /// Reconciliation answers are accepted until a start is issued for the selection.
    reconciling: bool,
    /// Reconciliation query that failed in transport; re-sent on the next poll tick.
    pending_reconcile: Option<Query>,
    /// A status query for this selection has been handed out and not yet answered.
    status_in_flight: bool,
    /// Cancel asked for while the start answer was outstanding.
    cancel_after_start: bool,
}

impl TrackerCore {
    pub fn new(pointers: Arc<dyn PointerStore>) -> Self {
        Self {
            pointers,
            subject: None,
            generation: 0,
            phase: Phase::Idle,
            reconciling: false,
            pending_reconcile: None,
            status_in_flight: false,
            cancel_after_start: false,
        }
    }

    pub fn state(&self) -> JobState {
        match &self.phase {
            Phase::Idle => JobState::Idle,
            Phase::Starting => JobState::Queued,
            Phase::Active(p) => p.state,
            Phase::Completed { .. } => JobState::Completed,
            Phase::Failed { .. } => JobState::Failed,
            Phase::Cancelled(_) => JobState::Cancelled,
        }
    }

    /// The job whose poll responses are accepted. `None` outside `queued`/`processing`.
    pub fn tracked_job(&self) -> Option<&JobId> {
        match &self.phase {
            Phase::Active(p) => Some(&p.job_id),
            _ => None,
        }
    }

    /// True while the poll timer should run.
    pub fn is_polling(&self) -> bool {
        matches!(self.phase, Phase::Active(_)) || self.pending_reconcile.is_some()
    }

    /// Switch to a subject. In-memory state is reset before anything is known about it.
    pub fn select_subject(&mut self, subject_id: SubjectId) -> Request {
        self.generation += 1;
        self.phase = Phase::Idle;
        self.reconciling = true;
        self.pending_reconcile = None;
        self.cancel_after_start = false;
        let query = match self.pointers.get(&subject_id) {
            Some(job_id) => Query::StatusByJob(job_id),
            None => Query::StatusBySubject(subject_id.clone()),
        };
        tracing::debug!(subject_id = %subject_id, generation = self.generation, ?query, "subject selected");
        self.subject = Some(subject_id);
        self.status_request(Purpose::Reconcile, query)
    }

    /// Request a new job. Idle and terminal states flip to `queued` (stale result/error dropped);
    /// an in-flight job stays as it is and the server's answer decides.
    pub fn start(&mut self) -> Option<Request> {
        let subject = self.subject.clone()?;
        if matches!(self.phase, Phase::Idle) || self.phase.is_terminal() {
            self.phase = Phase::Starting;
        }
        // the start answer is newer than anything reconciliation could still report
        self.reconciling = false;
        self.pending_reconcile = None;
        self.cancel_after_start = false;
        Some(self.request(Purpose::Start, Query::Start(subject)))
    }

    /// Request cancellation of the tracked job. Visible state does not change until a status
    /// query confirms a terminal state.
    ///
    /// While a start is outstanding there is no job to cancel yet, so the cancel is held and sent
    /// as a follow-up once the start answer names an active job.
    pub fn cancel(&mut self) -> Option<Request> {
        let subject = self.subject.clone()?;
        if matches!(self.phase, Phase::Starting) {
            tracing::debug!(subject_id = %subject, "cancel deferred until start answers");
            self.cancel_after_start = true;
            return None;
        }
        self.tracked_job()?;
        Some(self.request(Purpose::Cancel, Query::Cancel(subject)))
    }

    /// Status query to send on a poll tick, if any. Nothing is returned while an earlier status
    /// query for this selection is still unanswered.
    pub fn poll_request(&mut self) -> Option<Request> {
        if self.status_in_flight {
            return None;
        }
        if let Some(job_id) = self.tracked_job().cloned() {
            return Some(self.status_request(Purpose::Poll, Query::StatusByJob(job_id)));
        }
        let query = self.pending_reconcile.clone()?;
        Some(self.status_request(Purpose::Reconcile, query))
    }

    /// The server accepted a cancel; ask for confirmation right away instead of waiting a tick.
    pub fn cancel_acknowledged(&mut self, request: &Request) -> Option<Request> {
        if request.generation != self.generation {
            return None;
        }
        let job_id = self.tracked_job()?.clone();
        Some(self.status_request(Purpose::Poll, Query::StatusByJob(job_id)))
    }

    /// A status call ended without an answer (its task died). Lets the next tick ask again.
    pub fn status_lost(&mut self) {
        self.status_in_flight = false;
    }

    /// Apply a snapshot received in answer to `request`.
    pub fn apply(&mut self, request: &Request, snapshot: JobStatusSnapshot) -> ApplyOutcome {
        if request.generation != self.generation {
            tracing::debug!(
                generation = request.generation,
                current = self.generation,
                "discarding response from previous selection"
            );
            return ApplyOutcome::Discarded;
        }
        self.answered(request);
        let Some(subject) = self.subject.clone() else {
            return ApplyOutcome::Discarded;
        };

        match (&request.purpose, &request.query) {
            (Purpose::Poll, Query::StatusByJob(asked)) => {
                let answered = snapshot.job_id.as_ref().unwrap_or(asked);
                if self.tracked_job() != Some(asked) || answered != asked {
                    tracing::debug!(
                        subject_id = %subject,
                        job_id = %answered,
                        "discarding response for job no longer tracked"
                    );
                    return ApplyOutcome::Discarded;
                }
                self.adopt(&subject, snapshot, Some(asked.clone()));
                ApplyOutcome::Applied
            }
            (Purpose::Start, _) => {
                if self.is_finished_job(&snapshot) {
                    tracing::debug!(subject_id = %subject, job_id = ?snapshot.job_id, "discarding late start response for finished job");
                    return ApplyOutcome::Discarded;
                }
                self.adopt(&subject, snapshot, None);
                if std::mem::take(&mut self.cancel_after_start) && self.tracked_job().is_some() {
                    tracing::info!(subject_id = %subject, "sending cancel held during start");
                    return ApplyOutcome::FollowUp(
                        self.request(Purpose::Cancel, Query::Cancel(subject)),
                    );
                }
                ApplyOutcome::Applied
            }
            (Purpose::Reconcile, query) => {
                if !self.reconciling {
                    tracing::debug!(subject_id = %subject, "discarding reconciliation answer, selection already resolved");
                    return ApplyOutcome::Discarded;
                }
                if self.is_finished_job(&snapshot) {
                    tracing::debug!(subject_id = %subject, job_id = ?snapshot.job_id, "discarding late reconciliation for finished job");
                    return ApplyOutcome::Discarded;
                }
                self.pending_reconcile = None;
                let fallback = match query {
                    Query::StatusByJob(id) => Some(id.clone()),
                    _ => None,
                };
                self.adopt(&subject, snapshot, fallback);
                match query {
                    Query::StatusByJob(id) if matches!(self.phase, Phase::Idle) => {
                        tracing::info!(subject_id = %subject, job_id = %id, "pointer referenced unknown job, querying by subject");
                        ApplyOutcome::FollowUp(self.status_request(
                            Purpose::Reconcile,
                            Query::StatusBySubject(subject.clone()),
                        ))
                    }
                    _ => {
                        self.reconciling = false;
                        ApplyOutcome::Applied
                    }
                }
            }
            _ => ApplyOutcome::Discarded,
        }
    }

    /// Record a failed call for `request`.
    ///
    /// A job lookup answered with "not found" is an answer, applied like an idle snapshot for
    /// that job. Anything else is transient: polling is the retry mechanism, so state only changes
    /// for a failed start, which returns to `idle`.
    pub fn fail(&mut self, request: &Request, error: &JobApiError) -> ApplyOutcome {
        if request.generation != self.generation {
            return ApplyOutcome::Discarded;
        }
        self.answered(request);
        if let (JobApiError::NotFound(_), Query::StatusByJob(job_id)) = (error, &request.query) {
            let gone = JobStatusSnapshot {
                job_id: Some(job_id.clone()),
                ..JobStatusSnapshot::idle()
            };
            return self.apply(request, gone);
        }
        tracing::warn!(purpose = ?request.purpose, query = ?request.query, error = %error, "job request failed");
        match request.purpose {
            Purpose::Start => {
                if matches!(self.phase, Phase::Starting) {
                    self.phase = Phase::Idle;
                    self.cancel_after_start = false;
                }
            }
            Purpose::Reconcile => {
                if self.reconciling {
                    self.pending_reconcile = Some(request.query.clone());
                }
            }
            Purpose::Poll | Purpose::Cancel => {}
        }
        ApplyOutcome::Discarded
    }

    /// Read-only projection at wall-clock time `now`.
    pub fn view(&self, now: DateTime<Utc>) -> TrackerView {
        let progress = self.phase.progress();
        let elapsed_seconds = progress.map_or(0, |p| p.elapsed_seconds(now));
        let estimated_seconds = progress.and_then(|p| p.estimated_seconds);
        let (result, error) = match &self.phase {
            Phase::Completed { result, .. } => (result.clone(), None),
            Phase::Failed { error, .. } => (None, Some(error.clone())),
            _ => (None, None),
        };
        TrackerView {
            state: self.state(),
            elapsed_seconds,
            estimated_seconds,
            report_count: progress.map_or(0, |p| p.report_count),
            result,
            error,
            stage: stage(elapsed_seconds, estimated_seconds),
        }
    }

    fn request(&self, purpose: Purpose, query: Query) -> Request {
        Request {
            generation: self.generation,
            purpose,
            query,
        }
    }

    fn status_request(&mut self, purpose: Purpose, query: Query) -> Request {
        self.status_in_flight = true;
        self.request(purpose, query)
    }

    fn answered(&mut self, request: &Request) {
        if matches!(request.purpose, Purpose::Poll | Purpose::Reconcile) {
            self.status_in_flight = false;
        }
    }

    /// `snapshot` is about the job this tracker already saw reach a terminal state.
    fn is_finished_job(&self, snapshot: &JobStatusSnapshot) -> bool {
        match (&snapshot.job_id, self.phase.progress()) {
            (Some(id), Some(done)) => self.phase.is_terminal() && &done.job_id == id,
            _ => false,
        }
    }

    /// Unconditionally make `snapshot` the current truth for `subject`, pointer included.
    fn adopt(&mut self, subject: &SubjectId, snapshot: JobStatusSnapshot, fallback: Option<JobId>) {
        let job_id = match snapshot.job_id.clone().or(fallback) {
            Some(id) if snapshot.state != JobState::Idle => id,
            _ => {
                if !matches!(self.phase, Phase::Idle) {
                    tracing::info!(subject_id = %subject, "no job for subject");
                }
                self.phase = Phase::Idle;
                self.clear_pointer(subject);
                return;
            }
        };

        let mut progress = match self.phase.progress() {
            Some(p) if p.job_id == job_id => p.clone(),
            _ => Progress::new(job_id.clone()),
        };
        let previous = self.state();
        progress.merge(&snapshot);
        if previous != snapshot.state {
            tracing::info!(subject_id = %subject, job_id = %job_id, from = %previous, to = %snapshot.state, "job state changed");
        }

        self.phase = match snapshot.state {
            JobState::Queued | JobState::Processing => {
                self.set_pointer(subject, &job_id);
                Phase::Active(progress)
            }
            JobState::Completed => {
                self.clear_pointer(subject);
                Phase::Completed {
                    progress,
                    result: snapshot.result,
                }
            }
            JobState::Failed => {
                self.clear_pointer(subject);
                Phase::Failed {
                    progress,
                    error: snapshot
                        .error
                        .unwrap_or_else(|| "analysis failed".to_string()),
                }
            }
            JobState::Cancelled => {
                self.clear_pointer(subject);
                Phase::Cancelled(progress)
            }
            JobState::Idle => Phase::Idle,
        };
    }

    fn set_pointer(&self, subject: &SubjectId, job_id: &JobId) {
        if self.pointers.get(subject).as_ref() == Some(job_id) {
            return;
        }
        if let Err(e) = self.pointers.set(subject, job_id) {
            tracing::warn!(subject_id = %subject, job_id = %job_id, error = %e, "failed to write job pointer");
        }
    }

    fn clear_pointer(&self, subject: &SubjectId) {
        if let Err(e) = self.pointers.clear(subject) {
            tracing::warn!(subject_id = %subject, error = %e, "failed to clear job pointer");
        }
    }
}
