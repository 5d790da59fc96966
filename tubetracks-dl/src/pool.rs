//! Bounded worker pool
//!
//! Runs jobs against an [`ExtractionPort`] with at most `concurrency_limit`
//! attempts in flight, applying the [`RetryPolicy`] to failed attempts.
//!
//! **Algorithm:**
//! 1. Duplicate and archived jobs are emitted as skipped without dispatch
//! 2. Destination directories are created and probed once; jobs aimed at an
//!    unusable directory fail, and the run is fatal only if no job is left
//! 3. Pending jobs are dispatched in input order while a slot is free
//! 4. A retried job sleeps on a backoff timer outside the worker slots and
//!    rejoins the back of the pending queue when it fires
//! 5. Success records the id in the archive, then emits the result
//!
//! **Halting:**
//! - Cancellation stops dispatch at once; in-flight attempts get the grace
//!   period, then are aborted
//! - A fatal error stops dispatch; in-flight attempts drain
//! - Every job that never reached a terminal outcome is emitted as cancelled
//!
//! Exactly one [`JobResult`] is produced per input job, in completion order.

use crate::archive::SharedArchive;
use crate::error::{ErrorClass, ErrorKind, ExtractError, FatalError};
use crate::extractors::ExtractionPort;
use crate::job::{JobId, JobSpec};
use crate::models::{JobResult, SkipReason};
use crate::retry::{RetryPolicy, RetryState};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tubetracks_common::human_time::format_duration;

/// Default per-attempt timeout
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(600);
/// Default grace period for in-flight attempts after cancellation
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

const PROBE_FILE: &str = ".tubetracks-write-probe";

/// Progress notifications for a presentation layer
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    AttemptStarted {
        job_id: JobId,
        attempt: u32,
    },
    RetryScheduled {
        job_id: JobId,
        attempt: u32,
        delay: Duration,
        error: ExtractError,
    },
    Finished(JobResult),
}

/// Outcome of [`WorkerPool::run`]
#[derive(Debug)]
pub struct PoolRun {
    /// One result per input job, in completion order
    pub results: Vec<JobResult>,
    /// Set when a fatal condition halted dispatch
    pub fatal: Option<FatalError>,
    /// Set when the cancellation token fired during the run
    pub cancelled: bool,
}

pub struct WorkerPool {
    port: Arc<dyn ExtractionPort>,
    policy: RetryPolicy,
    archive: Option<SharedArchive>,
    attempt_timeout: Duration,
    cancel_grace: Duration,
    cancel_token: CancellationToken,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl WorkerPool {
    pub fn new(port: Arc<dyn ExtractionPort>, policy: RetryPolicy) -> Self {
        Self {
            port,
            policy,
            archive: None,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            cancel_token: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_archive(mut self, archive: SharedArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Token that cancels this pool's runs
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Run every job to a terminal state
    pub async fn run(&self, jobs: Vec<JobSpec>, concurrency_limit: usize) -> PoolRun {
        let limit = concurrency_limit.max(1);
        let total = jobs.len();
        let mut run = RunState::new(self, total);

        let archived = self.archived_ids(&jobs).await;
        let mut seen = HashSet::with_capacity(total);
        for job in jobs {
            if !seen.insert(job.id().clone()) {
                debug!(job_id = %job.id().short(), url = job.source_url(), "Duplicate job in this run");
                run.emit(JobResult::skipped(&job, SkipReason::Duplicate));
            } else if archived.contains(job.id()) {
                debug!(job_id = %job.id().short(), url = job.source_url(), "Already in archive");
                run.emit(JobResult::skipped(&job, SkipReason::Archived));
            } else {
                run.enqueue(job);
            }
        }

        info!(
            total,
            queued = run.pending.len(),
            skipped = run.results.len(),
            concurrency = limit,
            "Starting download pool"
        );

        let unusable = self.prepare_destinations(&run).await;
        if !unusable.is_empty() {
            if let Some(fatal) = run.fail_unusable(&unusable) {
                error!(error = %fatal, "No destination is writable, nothing dispatched");
                run.fatal = Some(fatal);
                return run.finish();
            }
        }

        let mut grace_deadline: Option<Instant> = None;

        loop {
            if !run.cancelled && self.cancel_token.is_cancelled() {
                run.cancelled = true;
                grace_deadline = Some(Instant::now() + self.cancel_grace);
                info!(
                    in_flight = run.running.len(),
                    grace = %format_duration(self.cancel_grace),
                    "Cancellation requested, no new attempts will start"
                );
            }

            if !run.halted() {
                while run.running.len() < limit {
                    let Some(id) = run.pending.pop_front() else {
                        break;
                    };
                    run.dispatch(id);
                }
            }

            let drained = run.running.is_empty()
                && (run.halted() || (run.pending.is_empty() && run.sleeping.is_empty()));
            if drained {
                break;
            }

            let halted = run.halted();
            tokio::select! {
                Some(joined) = run.running.join_next(), if !run.running.is_empty() => {
                    match joined {
                        Ok((id, outcome)) => run.complete_attempt(id, outcome).await,
                        Err(e) => error!(error = %e, "Attempt task failed to join"),
                    }
                }
                Some(id) = run.sleeping.next(), if !halted && !run.sleeping.is_empty() => {
                    debug!(job_id = %id.short(), "Backoff elapsed, job re-queued");
                    run.pending.push_back(id);
                }
                _ = self.cancel_token.cancelled(), if !run.cancelled => {}
                _ = tokio::time::sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if grace_deadline.is_some() => {
                    warn!(
                        in_flight = run.running.len(),
                        "Grace period expired, aborting in-flight attempts"
                    );
                    run.running.abort_all();
                    break;
                }
                else => break,
            }
        }

        run.finish()
    }

    /// Snapshot of archive membership for this batch
    async fn archived_ids(&self, jobs: &[JobSpec]) -> HashSet<JobId> {
        match &self.archive {
            Some(archive) => {
                let archive = archive.lock().await;
                jobs.iter()
                    .filter(|job| archive.contains(job.id()))
                    .map(|job| job.id().clone())
                    .collect()
            }
            None => HashSet::new(),
        }
    }

    /// Create every destination directory and check that it accepts files.
    /// Returns the directories that failed, with the reason.
    async fn prepare_destinations(&self, run: &RunState<'_>) -> BTreeMap<PathBuf, String> {
        let dirs: BTreeSet<PathBuf> = run
            .live
            .values()
            .map(|tracked| tracked.job.dest_dir().to_path_buf())
            .collect();

        let mut unusable = BTreeMap::new();
        for dir in dirs {
            if let Err(e) = probe_destination(&dir).await {
                warn!(path = %dir.display(), error = %e, "Destination directory is not writable");
                unusable.insert(dir, e.to_string());
            }
        }
        unusable
    }
}

async fn probe_destination(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let probe = dir.join(PROBE_FILE);
    tokio::fs::write(&probe, b"").await?;
    let _ = tokio::fs::remove_file(&probe).await;
    Ok(())
}

/// A job that has not yet reached a terminal state
struct Tracked {
    job: JobSpec,
    retry: RetryState,
    first_dispatch: Option<Instant>,
}

impl Tracked {
    fn elapsed(&self) -> Duration {
        self.first_dispatch
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }
}

type AttemptOutcome = (JobId, Result<PathBuf, ExtractError>);

/// Mutable bookkeeping of one [`WorkerPool::run`] call
struct RunState<'a> {
    pool: &'a WorkerPool,
    /// Input order of dispatchable jobs, for the final cancellation sweep
    order: Vec<JobId>,
    live: HashMap<JobId, Tracked>,
    pending: VecDeque<JobId>,
    running: JoinSet<AttemptOutcome>,
    sleeping: FuturesUnordered<BoxFuture<'static, JobId>>,
    results: Vec<JobResult>,
    fatal: Option<FatalError>,
    cancelled: bool,
}

impl<'a> RunState<'a> {
    fn new(pool: &'a WorkerPool, total: usize) -> Self {
        Self {
            pool,
            order: Vec::with_capacity(total),
            live: HashMap::with_capacity(total),
            pending: VecDeque::with_capacity(total),
            running: JoinSet::new(),
            sleeping: FuturesUnordered::new(),
            results: Vec::with_capacity(total),
            fatal: None,
            cancelled: false,
        }
    }

    fn halted(&self) -> bool {
        self.cancelled || self.fatal.is_some()
    }

    fn enqueue(&mut self, job: JobSpec) {
        let id = job.id().clone();
        self.order.push(id.clone());
        self.pending.push_back(id.clone());
        self.live.insert(
            id.clone(),
            Tracked {
                job,
                retry: RetryState::new(id),
                first_dispatch: None,
            },
        );
    }

    /// Fail every job whose destination is unusable. When that leaves
    /// nothing to dispatch, the jobs stay live and the fatal error is returned.
    fn fail_unusable(&mut self, unusable: &BTreeMap<PathBuf, String>) -> Option<FatalError> {
        let blocked: Vec<JobId> = self
            .order
            .iter()
            .filter(|id| {
                self.live
                    .get(*id)
                    .is_some_and(|t| unusable.contains_key(t.job.dest_dir()))
            })
            .cloned()
            .collect();

        if blocked.len() == self.live.len() {
            let (path, message) = unusable.iter().next()?;
            return Some(FatalError::DestinationUnwritable {
                path: path.clone(),
                message: message.clone(),
            });
        }

        self.pending.retain(|id| !blocked.contains(id));
        for id in blocked {
            self.terminate(&id, |t| {
                let reason = unusable.get(t.job.dest_dir()).map(String::as_str).unwrap_or_default();
                let error = ExtractError::new(
                    ErrorKind::DestinationUnwritable,
                    format!("{} is not writable: {}", t.job.dest_dir().display(), reason),
                );
                JobResult::failed(&t.job, 0, &error, Duration::ZERO)
            });
        }
        None
    }

    fn dispatch(&mut self, id: JobId) {
        let Some(tracked) = self.live.get_mut(&id) else {
            return;
        };
        let attempt = tracked.retry.begin_attempt();
        tracked.first_dispatch.get_or_insert_with(Instant::now);

        debug!(
            job_id = %id.short(),
            attempt,
            url = tracked.job.source_url(),
            "Starting attempt"
        );
        self.pool.notify(PipelineEvent::AttemptStarted {
            job_id: id.clone(),
            attempt,
        });

        let port = Arc::clone(&self.pool.port);
        let job = tracked.job.clone();
        let timeout = self.pool.attempt_timeout;

        self.running.spawn(async move {
            let attempt = tokio::time::timeout(timeout, port.extract(&job));
            let outcome = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(_elapsed)) => Err(ExtractError::new(
                    ErrorKind::AttemptTimeout,
                    format!("Attempt exceeded {}", format_duration(timeout)),
                )),
                Err(panic) => Err(ExtractError::new(
                    ErrorKind::ExtractorFailure,
                    format!("Extractor panicked: {}", panic_message(panic.as_ref())),
                )),
            };
            (job.id().clone(), outcome)
        });
    }

    async fn complete_attempt(&mut self, id: JobId, outcome: Result<PathBuf, ExtractError>) {
        match outcome {
            Ok(path) => self.succeed(id, path).await,
            Err(error) => self.fail_attempt(id, error),
        }
    }

    async fn succeed(&mut self, id: JobId, path: PathBuf) {
        let Some(tracked) = self.live.remove(&id) else {
            return;
        };

        if let Some(archive) = &self.pool.archive {
            let archive = Arc::clone(archive);
            let recorded = id.clone();
            let write = tokio::task::spawn_blocking(move || archive.blocking_lock().record(&recorded));
            if let Err(e) = write.await {
                warn!(job_id = %id.short(), error = %e, "Archive write task failed");
            }
        }

        let result = JobResult::success(&tracked.job, tracked.retry.attempts_made, path, tracked.elapsed());
        info!(
            job_id = %id.short(),
            attempts = result.attempts,
            path = ?result.output_path,
            elapsed = %format_duration(result.duration),
            "Download complete"
        );
        self.emit(result);
    }

    fn fail_attempt(&mut self, id: JobId, error: ExtractError) {
        let halted = self.halted();
        let Some(tracked) = self.live.get_mut(&id) else {
            return;
        };
        let attempts_made = tracked.retry.attempts_made;

        if error.kind.class() == ErrorClass::Fatal {
            error!(
                job_id = %id.short(),
                error = %error,
                "Fatal error, stopping dispatch"
            );
            if self.fatal.is_none() {
                self.fatal = Some(FatalError::Extraction {
                    job_id: id.to_string(),
                    error: error.clone(),
                });
            }
            self.terminate(&id, |t| JobResult::failed(&t.job, attempts_made, &error, t.elapsed()));
            return;
        }

        let decision = self.pool.policy.should_retry(attempts_made, error.kind);
        match decision.retry_after {
            Some(_) if halted => {
                debug!(job_id = %id.short(), error = %error, "Retry suppressed, run is halting");
                self.terminate(&id, |t| JobResult::cancelled(&t.job, attempts_made, Some(&error), t.elapsed()));
            }
            Some(delay) => {
                warn!(
                    job_id = %id.short(),
                    attempt = attempts_made,
                    error_kind = %error.kind,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retry scheduled"
                );
                tracked.retry.last_error = Some(error.clone());
                self.pool.notify(PipelineEvent::RetryScheduled {
                    job_id: id.clone(),
                    attempt: attempts_made,
                    delay,
                    error,
                });
                self.sleeping.push(
                    async move {
                        tokio::time::sleep(delay).await;
                        id
                    }
                    .boxed(),
                );
            }
            None => {
                error!(
                    job_id = %id.short(),
                    attempts = attempts_made,
                    error_kind = %error.kind,
                    error = %error.message,
                    "Download failed"
                );
                self.terminate(&id, |t| JobResult::failed(&t.job, attempts_made, &error, t.elapsed()));
            }
        }
    }

    /// Remove a live job and emit its terminal result
    fn terminate(&mut self, id: &JobId, result: impl FnOnce(&Tracked) -> JobResult) {
        if let Some(tracked) = self.live.remove(id) {
            let result = result(&tracked);
            self.emit(result);
        }
    }

    fn emit(&mut self, result: JobResult) {
        self.pool.notify(PipelineEvent::Finished(result.clone()));
        self.results.push(result);
    }

    /// Emit every unfinished job as cancelled, in input order
    fn finish(mut self) -> PoolRun {
        self.running.abort_all();
        let order = std::mem::take(&mut self.order);
        for id in order {
            if let Some(tracked) = self.live.remove(&id) {
                let last_error = tracked.retry.last_error.clone();
                let result = JobResult::cancelled(
                    &tracked.job,
                    tracked.retry.attempts_made,
                    last_error.as_ref(),
                    tracked.elapsed(),
                );
                self.emit(result);
            }
        }

        if self.cancelled || self.fatal.is_some() {
            info!(
                finished = self.results.len(),
                cancelled = self.cancelled,
                fatal = self.fatal.is_some(),
                "Download pool halted"
            );
        }

        PoolRun {
            results: self.results,
            fatal: self.fatal,
            cancelled: self.cancelled,
        }
    }
}

impl WorkerPool {
    fn notify(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // A closed receiver only means nobody is watching
            let _ = events.send(event);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tubetracks_common::{AudioFormat, Quality};

    /// Fails every attempt with the same kind
    struct AlwaysFails(ErrorKind, AtomicU32);

    #[async_trait::async_trait]
    impl ExtractionPort for AlwaysFails {
        async fn extract(&self, _job: &JobSpec) -> Result<PathBuf, ExtractError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Err(ExtractError::new(self.0, "scripted"))
        }
    }

    fn job(dir: &std::path::Path) -> JobSpec {
        JobSpec::new("https://example.com/a.mp3", AudioFormat::Mp3, Quality::High, dir).unwrap()
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_retries() {
        let dir = tempfile::TempDir::new().unwrap();
        let port = Arc::new(AlwaysFails(ErrorKind::NetworkTimeout, AtomicU32::new(0)));
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5));
        let pool = WorkerPool::new(port.clone(), policy);

        let run = pool.run(vec![job(dir.path())], 1).await;

        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].attempts, 3);
        assert_eq!(run.results[0].error, Some(ErrorKind::NetworkTimeout));
        assert_eq!(port.1.load(Ordering::SeqCst), 3);
        assert!(run.fatal.is_none());
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_treated_as_one() {
        let dir = tempfile::TempDir::new().unwrap();
        let port = Arc::new(AlwaysFails(ErrorKind::ContentRemoved, AtomicU32::new(0)));
        let pool = WorkerPool::new(port, RetryPolicy::default());

        let run = pool.run(vec![job(dir.path())], 0).await;
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let port = Arc::new(AlwaysFails(ErrorKind::ContentRemoved, AtomicU32::new(0)));
        let run = WorkerPool::new(port, RetryPolicy::default()).run(Vec::new(), 4).await;
        assert!(run.results.is_empty());
        assert!(!run.cancelled);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
