//! Analyzer trait: the work a job performs for a subject.

use async_trait::async_trait;
use job_types::SubjectId;
use std::time::Duration;

/// Up-front sizing of an analysis, reported to clients while the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisPlan {
    pub report_count: u32,
    pub estimated_seconds: Option<u64>,
}

/// Runs the AI analysis for one subject.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// How many reports will be analyzed and roughly how long it takes.
    async fn plan(&self, subject_id: &SubjectId) -> AnalysisPlan;

    /// Run the analysis. `Err` carries the message shown to the user.
    async fn analyze(&self, subject_id: &SubjectId) -> Result<serde_json::Value, String>;
}

/// Deterministic analyzer: sleeps for a fixed time per report and returns a canned summary.
pub struct FixedAnalyzer {
    per_report: Duration,
    report_count: u32,
}

impl FixedAnalyzer {
    pub fn new(per_report: Duration, report_count: u32) -> Self {
        Self {
            per_report,
            report_count,
        }
    }

    /// Reads `JOB_API_ANALYSIS_SECS` (total duration, default 30) for a three-report analysis.
    pub fn from_env() -> Self {
        let total = std::env::var("JOB_API_ANALYSIS_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        Self::new(Duration::from_secs(total) / 3, 3)
    }

    fn total(&self) -> Duration {
        self.per_report * self.report_count
    }
}

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn plan(&self, _subject_id: &SubjectId) -> AnalysisPlan {
        AnalysisPlan {
            report_count: self.report_count,
            estimated_seconds: Some(self.total().as_secs().max(1)),
        }
    }

    async fn analyze(&self, subject_id: &SubjectId) -> Result<serde_json::Value, String> {
        tokio::time::sleep(self.total()).await;
        Ok(serde_json::json!({
            "subjectId": subject_id.as_str(),
            "reportsAnalyzed": self.report_count,
            "summary": format!("{} reports reviewed; no critical findings", self.report_count),
        }))
    }
}
