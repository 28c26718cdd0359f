//! HTTP client for the analysis job REST API.

mod http;

pub use http::HttpJobClient;
pub use job_types::{JobApiError, JobControl, JobStatusQuery};
