//! Retry decisions for failed download attempts
//!
//! **Algorithm:**
//! 1. Permanent and fatal errors never retry
//! 2. Transient errors retry while `attempts_made <= max_retries`
//! 3. Delay is `base * 2^attempts_made`, capped at `max_delay`
//! 4. A random factor in `[1 - jitter, 1 + jitter]` is applied so jobs failing
//!    together against one host do not retry in lockstep
//!
//! The policy only decides; the worker pool owns the sleeping.

use crate::error::{ErrorKind, ExtractError};
use crate::job::JobId;
use rand::Rng;
use std::time::Duration;
use tubetracks_common::config::RetryConfig;

/// Outcome of consulting the policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// `Some(delay)` to retry after `delay`, `None` to give up
    pub retry_after: Option<Duration>,
}

impl RetryDecision {
    pub fn give_up() -> Self {
        Self { retry_after: None }
    }

    pub fn after(delay: Duration) -> Self {
        Self {
            retry_after: Some(delay),
        }
    }

    pub fn is_retry(&self) -> bool {
        self.retry_after.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter in [0, 1)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Policy without jitter
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.99);
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(config.jitter)
    }

    /// Total attempts a transient failure may use
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decide whether a job that has used `attempts_made` attempts and just
    /// failed with `kind` gets another one
    pub fn should_retry(&self, attempts_made: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_transient() || attempts_made > self.max_retries {
            return RetryDecision::give_up();
        }
        RetryDecision::after(self.jittered(self.backoff(attempts_made)))
    }

    /// Un-jittered delay: `base * 2^attempts_made`, capped at `max_delay`
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts_made).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        delay.mul_f64(factor)
    }
}

/// Per-job retry bookkeeping, owned by the worker pool while the job is live
#[derive(Debug, Clone)]
pub struct RetryState {
    pub job_id: JobId,
    pub attempts_made: u32,
    pub last_error: Option<ExtractError>,
}

impl RetryState {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            attempts_made: 0,
            last_error: None,
        }
    }

    /// Count an attempt as started; returns its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts_made += 1;
        self.attempts_made
    }
}
