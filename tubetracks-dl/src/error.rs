//! Error taxonomy for the download pipeline
//!
//! - [`ValidationError`]: malformed input, caught before dispatch
//! - [`ErrorKind`] / [`ExtractError`]: per-attempt failures, classified for retry
//! - [`StorageError`]: archive I/O, never fatal to a run
//! - [`FatalError`]: pool-level condition that halts dispatch

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Retry classification of an [`ErrorKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff
    Transient,
    /// Retrying cannot help
    Permanent,
    /// Affects every job, stops the pool
    Fatal,
}

/// Why a single download attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection timed out, reset, or DNS lookup failed
    NetworkTimeout,
    /// Remote side throttled us (HTTP 429 and friends)
    RateLimited,
    /// Extractor failed in a way that may not repeat
    ExtractorFailure,
    /// The attempt exceeded the per-attempt timeout
    AttemptTimeout,
    /// URL rejected by the remote or the extractor
    InvalidUrl,
    /// Content removed, private, or otherwise gone
    ContentRemoved,
    /// Requested output format cannot be produced
    UnsupportedFormat,
    /// No extractor handles this source
    UnsupportedSource,
    /// Login, cookies, or membership required
    AuthenticationRequired,
    /// Extractor executable or its helpers are not installed
    ExtractorMissing,
    /// Output cannot be written (permissions, full disk)
    DestinationUnwritable,
}

impl ErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::NetworkTimeout
            | ErrorKind::RateLimited
            | ErrorKind::ExtractorFailure
            | ErrorKind::AttemptTimeout => ErrorClass::Transient,
            ErrorKind::InvalidUrl
            | ErrorKind::ContentRemoved
            | ErrorKind::UnsupportedFormat
            | ErrorKind::UnsupportedSource
            | ErrorKind::AuthenticationRequired
            | ErrorKind::ExtractorMissing => ErrorClass::Permanent,
            ErrorKind::DestinationUnwritable => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ExtractorFailure => "extractor_failure",
            ErrorKind::AttemptTimeout => "attempt_timeout",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::ContentRemoved => "content_removed",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::UnsupportedSource => "unsupported_source",
            ErrorKind::AuthenticationRequired => "authentication_required",
            ErrorKind::ExtractorMissing => "extractor_missing",
            ErrorKind::DestinationUnwritable => "destination_unwritable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported across the extraction boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ExtractError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExtractError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Malformed job input, rejected before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL is empty")]
    EmptyUrl,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("Destination directory is empty")]
    EmptyDestination,
}

/// Archive I/O failure
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read archive {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive {}: {}", .path.display(), .source)]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pool-level failure: dispatch stops, in-flight work drains
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("Destination directory {} is not writable: {}", .path.display(), .message)]
    DestinationUnwritable { path: PathBuf, message: String },

    #[error("Job {job_id} hit a fatal error: {error}")]
    Extraction { job_id: String, error: ExtractError },
}
