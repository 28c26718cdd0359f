//! Analysis job tracker: starts a server-side analysis job for a subject, polls it, resumes it
//! after a reload, and derives a coarse progress stage for display.

mod config;
mod machine;
mod progress;
mod tracker;

pub use config::TrackerConfig;
pub use job_types::{
    JobApiError, JobControl, JobId, JobState, JobStatusQuery, JobStatusSnapshot, PointerStore,
    SubjectId,
};
pub use machine::{ApplyOutcome, Purpose, Query, Request, TrackerCore};
pub use progress::{stage, StageLabel};
pub use tracker::{JobTracker, TrackerView};
