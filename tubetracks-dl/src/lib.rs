//! # TubeTracks Downloader
//!
//! Bounded, retrying, resumable audio download pipeline.
//!
//! **Architecture:**
//! - [`job`]: URL normalization and stable job identity
//! - [`archive`]: persisted set of completed job ids
//! - [`retry`]: transient/permanent retry decisions with jittered backoff
//! - [`pool`]: bounded worker pool with cancellation and fatal-error drain
//! - [`extractors`]: extraction boundary, the registered extractors and
//!   playlist expansion
//! - [`report`]: outcome aggregation and JSON report
//! - [`cli`]: command-line surface for the `tubetracks` binary

pub mod archive;
pub mod cli;
pub mod error;
pub mod extractors;
pub mod job;
pub mod models;
pub mod pool;
pub mod report;
pub mod retry;

pub use archive::{ArchiveStore, SharedArchive};
pub use error::{ErrorClass, ErrorKind, ExtractError, FatalError, StorageError, ValidationError};
pub use extractors::{ExtractionPort, Extractor, ExtractorRegistry, PlaylistSource};
pub use job::{JobId, JobSpec, JobTemplate, Platform};
pub use models::{JobResult, JobStatus, SkipReason};
pub use pool::{PipelineEvent, PoolRun, WorkerPool};
pub use report::{ReportCollector, Summary};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
