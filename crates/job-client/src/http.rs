//! reqwest implementation of the job collaborator traits.

use job_types::{JobApiError, JobControl, JobId, JobStatusQuery, JobStatusSnapshot, SubjectId};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to the job REST API (`/subjects/{id}/job`, `/jobs/{id}`).
pub struct HttpJobClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpJobClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_timeout(base_url, token, REQUEST_TIMEOUT)
    }

    /// Every call fails with `Transport` once `timeout` passes without a full response.
    pub fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "http client config rejected, using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }

    /// `JOB_API_URL` (default `http://127.0.0.1:8002`) and optional `JOB_API_TOKEN`.
    pub fn from_env() -> Self {
        let url =
            std::env::var("JOB_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8002".to_string());
        let token = std::env::var("JOB_API_TOKEN").ok();
        Self::new(url, token)
    }

    /// Base URL plus `segments`, each percent-encoded as a single path segment.
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, JobApiError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            JobApiError::Transport(format!("invalid base url {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                JobApiError::Transport(format!("base url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn subject_url(
        &self,
        subject_id: &SubjectId,
        cancel: bool,
    ) -> Result<reqwest::Url, JobApiError> {
        if cancel {
            self.url(&["subjects", subject_id.as_str(), "job", "cancel"])
        } else {
            self.url(&["subjects", subject_id.as_str(), "job"])
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<(u16, String), JobApiError> {
        let req = match self.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        };
        let res = req
            .send()
            .await
            .map_err(|e| JobApiError::Transport(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| JobApiError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(JobApiError::Status {
                code: status.as_u16(),
                message: body,
            });
        }
        Ok((status.as_u16(), body))
    }

    async fn snapshot(&self, req: reqwest::RequestBuilder) -> Result<JobStatusSnapshot, JobApiError> {
        let (_, body) = self.send(req).await?;
        serde_json::from_str(&body).map_err(|e| JobApiError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl JobControl for HttpJobClient {
    async fn start_job(&self, subject_id: &SubjectId) -> Result<JobStatusSnapshot, JobApiError> {
        let url = self.subject_url(subject_id, false)?;
        self.snapshot(self.client.post(url)).await
    }

    async fn cancel_job(&self, subject_id: &SubjectId) -> Result<(), JobApiError> {
        let url = self.subject_url(subject_id, true)?;
        let (code, _) = self.send(self.client.post(url)).await?;
        tracing::debug!(subject_id = %subject_id, code, "cancel accepted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStatusQuery for HttpJobClient {
    async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatusSnapshot, JobApiError> {
        let url = self.url(&["jobs", job_id.as_str()])?;
        match self.snapshot(self.client.get(url)).await {
            Err(JobApiError::Status { code: 404, .. }) => {
                Err(JobApiError::NotFound(job_id.to_string()))
            }
            other => other,
        }
    }

    async fn get_job_status_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<JobStatusSnapshot, JobApiError> {
        let url = self.subject_url(subject_id, false)?;
        self.snapshot(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let c = HttpJobClient::new("http://localhost:8002/", None);
        assert_eq!(
            c.subject_url(&SubjectId::from("p1"), true).unwrap().as_str(),
            "http://localhost:8002/subjects/p1/job/cancel"
        );
    }

    #[test]
    fn ids_are_encoded_as_one_segment() {
        let c = HttpJobClient::new("http://localhost:8002/api", None);
        assert_eq!(
            c.subject_url(&SubjectId::from("case/4 #1?x"), false)
                .unwrap()
                .as_str(),
            "http://localhost:8002/api/subjects/case%2F4%20%231%3Fx/job"
        );
        assert_eq!(c.url(&["jobs", "a/b"]).unwrap().path(), "/api/jobs/a%2Fb");
    }

    #[tokio::test]
    async fn bad_base_url_is_transport_error() {
        let c = HttpJobClient::new("not a url", None);
        let err = c.get_job_status(&JobId::from("j")).await.unwrap_err();
        assert!(matches!(err, JobApiError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        // port 9 (discard) is essentially never listening on loopback
        let c = HttpJobClient::new("http://127.0.0.1:9", None);
        let err = c
            .get_job_status_for_subject(&SubjectId::from("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobApiError::Transport(_)), "{err}");
    }
}
