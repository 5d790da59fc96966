//! Scripted ExtractionPort for pool tests

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tubetracks_dl::{ErrorKind, ExtractError, ExtractionPort, JobId, JobSpec};

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Ok,
    Err(ErrorKind),
    Panic,
}

/// One scripted attempt
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub delay: Duration,
    pub outcome: Outcome,
}

impl Step {
    pub fn ok() -> Self {
        Self { delay: Duration::ZERO, outcome: Outcome::Ok }
    }

    pub fn err(kind: ErrorKind) -> Self {
        Self { delay: Duration::ZERO, outcome: Outcome::Err(kind) }
    }

    pub fn panic() -> Self {
        Self { delay: Duration::ZERO, outcome: Outcome::Panic }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Jobs without a script (or past the end of theirs) succeed immediately
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<JobId, VecDeque<Step>>>,
    calls: Mutex<HashMap<JobId, u32>>,
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

/// Decrements the in-flight gauge even when the attempt is aborted or panics
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, job: &JobSpec, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(job.id().clone(), steps.into());
        self
    }

    pub fn calls_for(&self, job: &JobSpec) -> u32 {
        self.calls.lock().unwrap().get(job.id()).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExtractionPort for ScriptedExtractor {
    async fn extract(&self, job: &JobSpec) -> Result<PathBuf, ExtractError> {
        *self.calls.lock().unwrap().entry(job.id().clone()).or_insert(0) += 1;
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(job.id())
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(Step::ok);

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.current);

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.outcome {
            Outcome::Ok => Ok(job
                .dest_dir()
                .join(format!("{}.{}", job.id().short(), job.format().extension()))),
            Outcome::Err(kind) => Err(ExtractError::new(kind, "scripted failure")),
            Outcome::Panic => panic!("scripted panic"),
        }
    }
}
