//! Async driver: one task per tracker owns the [`TrackerCore`] and runs every collaborator call,
//! timer tick and command through a single `select!` loop.

use crate::machine::{ApplyOutcome, Query, Request, TrackerCore};
use crate::progress::StageLabel;
use crate::TrackerConfig;
use chrono::Utc;
use job_types::{
    JobApiError, JobControl, JobState, JobStatusQuery, JobStatusSnapshot, PointerStore, SubjectId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

/// Read-only projection handed to presentation code.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerView {
    pub state: JobState,
    pub elapsed_seconds: u64,
    pub estimated_seconds: Option<u64>,
    pub report_count: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub stage: StageLabel,
}

#[derive(Debug)]
enum Command {
    Select(SubjectId),
    Start,
    Cancel,
}

type CallResult = Result<Option<JobStatusSnapshot>, JobApiError>;

/// Handle to a running tracker. Dropping it stops the task and any in-flight calls.
pub struct JobTracker {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<TrackerView>,
    task: JoinHandle<()>,
}

impl JobTracker {
    /// Spawn the tracker task on the current tokio runtime.
    pub fn spawn(
        control: Arc<dyn JobControl>,
        status: Arc<dyn JobStatusQuery>,
        pointers: Arc<dyn PointerStore>,
        config: TrackerConfig,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(TrackerView::default());
        let driver = Driver {
            core: TrackerCore::new(pointers),
            control,
            status,
            status_calls: JoinSet::new(),
            control_calls: JoinSet::new(),
            view_tx,
        };
        let task = tokio::spawn(driver.run(rx, config));
        Self {
            commands,
            view,
            task,
        }
    }

    pub fn select_subject(&self, subject_id: impl Into<SubjectId>) {
        self.send(Command::Select(subject_id.into()));
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// Latest published view.
    pub fn view(&self) -> TrackerView {
        self.view.borrow().clone()
    }

    /// Change notifications for the view.
    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.view.clone()
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            tracing::debug!(command = ?e.0, "tracker task already stopped");
        }
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Driver {
    core: TrackerCore,
    control: Arc<dyn JobControl>,
    status: Arc<dyn JobStatusQuery>,
    /// Status queries; abandoned when the subject changes.
    status_calls: JoinSet<(Request, CallResult)>,
    /// Start and cancel calls; always run to completion.
    control_calls: JoinSet<(Request, CallResult)>,
    view_tx: watch::Sender<TrackerView>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, config: TrackerConfig) {
        let mut poll = tokio::time::interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick = tokio::time::interval(config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let was_polling = self.core.is_polling();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(joined) = self.status_calls.join_next(), if !self.status_calls.is_empty() => {
                    self.handle_joined(joined);
                }
                Some(joined) = self.control_calls.join_next(), if !self.control_calls.is_empty() => {
                    self.handle_joined(joined);
                }
                _ = poll.tick(), if was_polling => {
                    if let Some(request) = self.core.poll_request() {
                        self.dispatch(request);
                    }
                }
                _ = tick.tick(), if self.core.tracked_job().is_some() => {}
            }
            if !was_polling && self.core.is_polling() {
                // first poll one full interval after the job became active
                poll.reset();
            }
            self.publish();
        }
        tracing::debug!("tracker stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select(subject_id) => {
                // status for the previous subject is no longer wanted
                self.status_calls.abort_all();
                let request = self.core.select_subject(subject_id);
                self.dispatch(request);
            }
            Command::Start => match self.core.start() {
                Some(request) => self.dispatch(request),
                None => tracing::debug!("start ignored: no subject selected"),
            },
            Command::Cancel => match self.core.cancel() {
                Some(request) => self.dispatch(request),
                None => tracing::debug!("no cancel sent now: no active job or start pending"),
            },
        }
    }

    fn handle_joined(&mut self, joined: Result<(Request, CallResult), JoinError>) {
        let (request, result) = match joined {
            Ok(done) => done,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::error!(error = %e, "job request task failed");
                self.core.status_lost();
                return;
            }
        };
        let outcome = match result {
            Ok(Some(snapshot)) => self.core.apply(&request, snapshot),
            Ok(None) => {
                tracing::info!(query = ?request.query, "cancel accepted, awaiting confirmation");
                if let Some(confirm) = self.core.cancel_acknowledged(&request) {
                    self.dispatch(confirm);
                }
                return;
            }
            Err(e) => self.core.fail(&request, &e),
        };
        if let ApplyOutcome::FollowUp(next) = outcome {
            self.dispatch(next);
        }
    }

    fn dispatch(&mut self, request: Request) {
        let control = Arc::clone(&self.control);
        let status = Arc::clone(&self.status);
        let calls = match request.query {
            Query::Start(_) | Query::Cancel(_) => &mut self.control_calls,
            Query::StatusByJob(_) | Query::StatusBySubject(_) => &mut self.status_calls,
        };
        calls.spawn(async move {
            let result = match &request.query {
                Query::Start(subject_id) => control.start_job(subject_id).await.map(Some),
                Query::Cancel(subject_id) => control.cancel_job(subject_id).await.map(|()| None),
                Query::StatusByJob(job_id) => status.get_job_status(job_id).await.map(Some),
                Query::StatusBySubject(subject_id) => {
                    status.get_job_status_for_subject(subject_id).await.map(Some)
                }
            };
            (request, result)
        });
    }

    fn publish(&self) {
        let next = self.core.view(Utc::now());
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
