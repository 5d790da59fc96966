//! Test helpers for tubetracks-dl integration tests
//!
//! - ScriptedExtractor: in-memory ExtractionPort with per-job scripted outcomes,
//!   call counters and a max-concurrency gauge
//! - Job and policy builders

pub mod scripted_extractor;

pub use scripted_extractor::{Outcome, ScriptedExtractor, Step};

use std::path::Path;
use std::time::Duration;
use tubetracks_common::{AudioFormat, Quality};
use tubetracks_dl::{JobSpec, RetryPolicy};

/// Distinct direct-download job writing into `dir`
pub fn job(n: usize, dir: &Path) -> JobSpec {
    JobSpec::new(
        &format!("https://example.com/audio/track-{}.mp3", n),
        AudioFormat::Mp3,
        Quality::High,
        dir,
    )
    .unwrap()
}

pub fn jobs(count: usize, dir: &Path) -> Vec<JobSpec> {
    (0..count).map(|n| job(n, dir)).collect()
}

/// Millisecond backoff without jitter
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(10))
}
