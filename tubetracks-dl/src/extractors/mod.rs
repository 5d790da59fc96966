//! Extraction boundary
//!
//! The worker pool only knows [`ExtractionPort`]: "turn this job into an
//! output file, or tell me what kind of failure happened". The production
//! port is [`ExtractorRegistry`], a fixed table of [`Extractor`]s registered
//! at startup. The first registered extractor that supports a job handles it.
//!
//! # Extractors
//! 1. **http** - direct download of audio files already in the requested format
//! 2. **ytdlp** - `yt-dlp` subprocess for platform pages (YouTube, SoundCloud, ...)
//!
//! Playlists are expanded into single-track URLs by [`playlist`] before any
//! job exists.

pub mod http;
pub mod playlist;
pub mod ytdlp;

pub use http::HttpExtractor;
pub use playlist::{expand_playlists, PlaylistSource, YtDlpPlaylist};
pub use ytdlp::YtDlpExtractor;

use crate::error::{ErrorKind, ExtractError};
use crate::job::JobSpec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tubetracks_common::config::TomlConfig;

/// What the worker pool calls for every attempt
#[async_trait::async_trait]
pub trait ExtractionPort: Send + Sync {
    /// Download and convert one job, returning the written file
    async fn extract(&self, job: &JobSpec) -> Result<PathBuf, ExtractError>;
}

/// One registered way of fetching media
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    /// Extractor name for logs
    fn name(&self) -> &'static str;

    /// Whether this extractor can handle the job's source
    fn supports(&self, job: &JobSpec) -> bool;

    async fn extract(&self, job: &JobSpec) -> Result<PathBuf, ExtractError>;
}

/// Explicit, ordered table of extractors
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extractor; earlier registrations take precedence
    pub fn register(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Direct HTTP downloads first, yt-dlp for everything else
    pub fn with_defaults(config: &TomlConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.attempt_timeout_secs);
        Ok(Self::new()
            .register(Arc::new(HttpExtractor::new(timeout)?))
            .register(Arc::new(YtDlpExtractor::new(
                config.ytdlp_path.clone(),
                config.filename_template.clone(),
            ))))
    }

    /// First extractor supporting `job`
    pub fn resolve(&self, job: &JobSpec) -> Option<&Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.supports(job))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }
}

#[async_trait::async_trait]
impl ExtractionPort for ExtractorRegistry {
    async fn extract(&self, job: &JobSpec) -> Result<PathBuf, ExtractError> {
        let extractor = self.resolve(job).ok_or_else(|| {
            ExtractError::new(
                ErrorKind::UnsupportedSource,
                format!("No extractor handles {}", job.source_url()),
            )
        })?;

        debug!(
            extractor = extractor.name(),
            job_id = %job.id().short(),
            url = job.source_url(),
            "Dispatching to extractor"
        );
        extractor.extract(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubetracks_common::{AudioFormat, Quality};

    struct OnlyHost(&'static str, &'static str);

    #[async_trait::async_trait]
    impl Extractor for OnlyHost {
        fn name(&self) -> &'static str {
            self.0
        }

        fn supports(&self, job: &JobSpec) -> bool {
            job.source_url().contains(self.1)
        }

        async fn extract(&self, _job: &JobSpec) -> Result<PathBuf, ExtractError> {
            Ok(PathBuf::from(self.0))
        }
    }

    fn job(url: &str) -> JobSpec {
        JobSpec::new(url, AudioFormat::Mp3, Quality::High, "out").unwrap()
    }

    #[tokio::test]
    async fn test_first_supporting_extractor_wins() {
        let registry = ExtractorRegistry::new()
            .register(Arc::new(OnlyHost("first", "example.com")))
            .register(Arc::new(OnlyHost("second", "example")));

        assert_eq!(registry.names(), vec!["first", "second"]);
        let path = registry.extract(&job("https://example.com/a")).await.unwrap();
        assert_eq!(path, PathBuf::from("first"));
        let path = registry.extract(&job("https://example.org/a")).await.unwrap();
        assert_eq!(path, PathBuf::from("second"));
    }

    #[tokio::test]
    async fn test_unsupported_source_is_permanent() {
        let registry = ExtractorRegistry::new().register(Arc::new(OnlyHost("only", "example.com")));
        let err = registry.extract(&job("https://soundcloud.com/a/b")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedSource);
        assert!(!err.kind.is_transient());
    }

    #[test]
    fn test_default_registry_order() {
        let registry = ExtractorRegistry::with_defaults(&TomlConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["http", "ytdlp"]);

        let direct = job("https://cdn.example.com/audio/track.mp3");
        assert_eq!(registry.resolve(&direct).unwrap().name(), "http");
        let page = job("https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(registry.resolve(&page).unwrap().name(), "ytdlp");
    }
}
