//! Reference analysis job service: accepts start/cancel/status calls, runs analyses on a worker.

mod analyzer;
mod memory;

pub use analyzer::{AnalysisPlan, Analyzer, FixedAnalyzer};
pub use job_types::{JobApiError, JobControl, JobStatusQuery};
pub use memory::InMemoryJobService;
