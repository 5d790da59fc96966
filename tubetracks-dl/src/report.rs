//! Outcome aggregation
//!
//! [`ReportCollector`] accumulates [`JobResult`]s in emission (completion)
//! order. [`ReportCollector::summary`] is a pure snapshot and can be taken at
//! any point, including mid-run for a partial tally.

use crate::error::ErrorKind;
use crate::models::{JobResult, JobStatus};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tubetracks_common::human_time::format_duration;

/// Run tally
///
/// Display: "N jobs: A succeeded, B skipped, C failed, D cancelled"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Error kinds of failed jobs
    pub by_error_kind: BTreeMap<ErrorKind, usize>,
}

impl Summary {
    pub fn display_string(&self) -> String {
        let mut line = format!(
            "{} jobs: {} succeeded, {} skipped, {} failed, {} cancelled",
            self.total, self.succeeded, self.skipped, self.failed, self.cancelled
        );
        if !self.by_error_kind.is_empty() {
            let kinds: Vec<String> = self
                .by_error_kind
                .iter()
                .map(|(kind, count)| format!("{}={}", kind, count))
                .collect();
            line.push_str(&format!(" ({})", kinds.join(", ")));
        }
        line
    }

    /// Every job either succeeded or was skipped
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

#[derive(Debug, Default)]
pub struct ReportCollector {
    results: Vec<JobResult>,
}

#[derive(Serialize)]
struct Report<'a> {
    generated_at: String,
    summary: Summary,
    results: &'a [JobResult],
}

impl ReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: JobResult) {
        self.results.push(result);
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.results.len(),
            ..Summary::default()
        };

        for result in &self.results {
            match result.status {
                JobStatus::Success => summary.succeeded += 1,
                JobStatus::Skipped => summary.skipped += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
                JobStatus::Failed => {
                    summary.failed += 1;
                    if let Some(kind) = result.error {
                        *summary.by_error_kind.entry(kind).or_insert(0) += 1;
                    }
                }
            }
        }

        summary
    }

    /// Results in completion order
    pub fn results(&self) -> &[JobResult] {
        &self.results
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results
            .iter()
            .filter(|r| r.status == JobStatus::Failed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let report = Report {
            generated_at: Utc::now().to_rfc3339(),
            summary: self.summary(),
            results: &self.results,
        };
        serde_json::to_string_pretty(&report)
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// One line per failed job, for the end-of-run listing
    pub fn failure_lines(&self) -> Vec<String> {
        self.failures()
            .map(|r| {
                format!(
                    "{} [{}] after {} attempt(s), {}: {}",
                    r.source_url,
                    r.error.map(|k| k.as_str()).unwrap_or("unknown"),
                    r.attempts,
                    format_duration(r.duration),
                    r.error_message.as_deref().unwrap_or("")
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use crate::job::JobSpec;
    use crate::models::SkipReason;
    use std::path::PathBuf;
    use std::time::Duration;
    use tubetracks_common::{AudioFormat, Quality};

    fn job(n: u32) -> JobSpec {
        JobSpec::new(
            &format!("https://example.com/{}.mp3", n),
            AudioFormat::Mp3,
            Quality::High,
            "out",
        )
        .unwrap()
    }

    fn collector() -> ReportCollector {
        let mut collector = ReportCollector::new();
        let removed = ExtractError::new(ErrorKind::ContentRemoved, "gone");
        let throttled = ExtractError::new(ErrorKind::RateLimited, "429");
        collector.add(JobResult::success(&job(1), 1, PathBuf::from("out/1.mp3"), Duration::from_secs(2)));
        collector.add(JobResult::skipped(&job(2), SkipReason::Archived));
        collector.add(JobResult::failed(&job(3), 1, &removed, Duration::from_secs(1)));
        collector.add(JobResult::failed(&job(4), 6, &throttled, Duration::from_secs(9)));
        collector.add(JobResult::failed(&job(5), 1, &removed, Duration::from_secs(1)));
        collector.add(JobResult::cancelled(&job(6), 2, Some(&throttled), Duration::from_secs(3)));
        collector
    }

    #[test]
    fn test_summary_counts() {
        let summary = collector().summary();
        assert_eq!(summary.total, 6);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.by_error_kind.get(&ErrorKind::ContentRemoved), Some(&2));
        assert_eq!(summary.by_error_kind.get(&ErrorKind::RateLimited), Some(&1));
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_summary_is_idempotent() {
        let collector = collector();
        assert_eq!(collector.summary(), collector.summary());
        assert_eq!(collector.results().len(), 6);
    }

    #[test]
    fn test_empty_summary_is_clean() {
        let summary = ReportCollector::new().summary();
        assert_eq!(summary.total, 0);
        assert!(summary.is_clean());
        assert_eq!(
            summary.display_string(),
            "0 jobs: 0 succeeded, 0 skipped, 0 failed, 0 cancelled"
        );
    }

    #[test]
    fn test_display_lists_error_kinds() {
        let line = collector().summary().display_string();
        assert!(line.ends_with("(rate_limited=1, content_removed=2)"), "{line}");
    }

    #[test]
    fn test_json_report() {
        let json: serde_json::Value = serde_json::from_str(&collector().to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["failed"], 3);
        assert_eq!(json["summary"]["by_error_kind"]["content_removed"], 2);
        assert_eq!(json["results"].as_array().unwrap().len(), 6);
        assert!(json["generated_at"].is_string());
    }
}
