//! Per-job outcomes

use crate::error::{ErrorKind, ExtractError};
use crate::job::{JobId, JobSpec};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Terminal state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Output file written
    Success,
    /// Not attempted (already archived, or duplicate within the run)
    Skipped,
    /// Gave up: permanent error or retries exhausted
    Failed,
    /// Run was cancelled or halted before the job finished
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Skipped => "skipped",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Recorded in the download archive by an earlier run
    Archived,
    /// Same job id appeared earlier in this run
    Duplicate,
}

/// Terminal result of one job, emitted exactly once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub source_url: String,
    pub status: JobStatus,

    /// Attempts started (0 for skipped jobs)
    pub attempts: u32,

    /// Kind of the last error, if the job did not succeed because of one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Wall time from first dispatch to terminal state
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,

    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    fn base(job: &JobSpec, status: JobStatus, attempts: u32, duration: Duration) -> Self {
        Self {
            job_id: job.id().clone(),
            source_url: job.source_url().to_string(),
            status,
            attempts,
            error: None,
            error_message: None,
            skip_reason: None,
            output_path: None,
            duration,
            finished_at: Utc::now(),
        }
    }

    pub fn success(job: &JobSpec, attempts: u32, output_path: PathBuf, duration: Duration) -> Self {
        Self {
            output_path: Some(output_path),
            ..Self::base(job, JobStatus::Success, attempts, duration)
        }
    }

    pub fn skipped(job: &JobSpec, reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::base(job, JobStatus::Skipped, 0, Duration::ZERO)
        }
    }

    pub fn failed(job: &JobSpec, attempts: u32, error: &ExtractError, duration: Duration) -> Self {
        Self {
            error: Some(error.kind),
            error_message: Some(error.message.clone()),
            ..Self::base(job, JobStatus::Failed, attempts, duration)
        }
    }

    /// `last_error` is kept when an attempt had already failed before the halt
    pub fn cancelled(
        job: &JobSpec,
        attempts: u32,
        last_error: Option<&ExtractError>,
        duration: Duration,
    ) -> Self {
        Self {
            error: last_error.map(|e| e.kind),
            error_message: last_error.map(|e| e.message.clone()),
            ..Self::base(job, JobStatus::Cancelled, attempts, duration)
        }
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubetracks_common::{AudioFormat, Quality};

    #[test]
    fn test_failed_result_json() {
        let job = JobSpec::new("https://example.com/a.mp3", AudioFormat::Mp3, Quality::High, "out").unwrap();
        let error = ExtractError::new(ErrorKind::ContentRemoved, "HTTP 404");
        let result = JobResult::failed(&job, 1, &error, Duration::from_millis(1500));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "content_removed");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["job_id"], job.id().as_str());
        assert!(json.get("output_path").is_none());
    }

    #[test]
    fn test_skipped_has_no_attempts() {
        let job = JobSpec::new("https://example.com/a.mp3", AudioFormat::Mp3, Quality::High, "out").unwrap();
        let result = JobResult::skipped(&job, SkipReason::Archived);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.status, JobStatus::Skipped);
        assert_eq!(result.error, None);
    }
}
