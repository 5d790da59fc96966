//! Direct HTTP extractor
//!
//! Handles URLs that already point at an audio file in the requested format.
//! No transcoding: the body is streamed to `<dest>/.<name>.part` and renamed
//! into place once complete. The partial file is removed on any failure,
//! including an attempt dropped by timeout or cancellation.

use super::Extractor;
use crate::error::{ErrorKind, ExtractError};
use crate::job::JobSpec;
use reqwest::{Client, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct HttpExtractor {
    client: Client,
}

impl HttpExtractor {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("tubetracks/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Extractor for HttpExtractor {
    fn name(&self) -> &'static str {
        "http"
    }

    fn supports(&self, job: &JobSpec) -> bool {
        file_name(job.source_url())
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
            .map_or(false, |ext| ext == job.format().extension())
    }

    async fn extract(&self, job: &JobSpec) -> Result<PathBuf, ExtractError> {
        let name = file_name(job.source_url()).ok_or_else(|| {
            ExtractError::new(ErrorKind::InvalidUrl, "URL has no file name")
        })?;
        let target = job.dest_dir().join(&name);
        let partial = job.dest_dir().join(format!(".{}.part", name));

        let mut response = self
            .client
            .get(job.source_url())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::new(
                classify_status(status),
                format!("HTTP {} from {}", status, job.source_url()),
            ));
        }

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| write_error(&partial, e))?;
        let guard = PartialFile::new(partial.clone());

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            file.write_all(&chunk).await.map_err(|e| write_error(&partial, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| write_error(&partial, e))?;
        drop(file);

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| write_error(&target, e))?;
        guard.keep();

        debug!(
            job_id = %job.id().short(),
            path = %target.display(),
            bytes = written,
            "Direct download complete"
        );
        Ok(target)
    }
}

/// Deletes the partial download unless the attempt completed
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.keep {
            // Drop may run on an aborted task, so no async here
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "Partial file not removed");
                }
            }
        }
    }
}

/// Last non-empty path segment of `url`
fn file_name(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.replace(['/', '\\'], "_"))
}

pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        404 | 410 => ErrorKind::ContentRemoved,
        401 | 403 | 407 => ErrorKind::AuthenticationRequired,
        408 => ErrorKind::NetworkTimeout,
        429 => ErrorKind::RateLimited,
        415 => ErrorKind::UnsupportedFormat,
        400..=499 => ErrorKind::InvalidUrl,
        _ => ErrorKind::ExtractorFailure,
    }
}

fn request_error(e: reqwest::Error) -> ExtractError {
    let kind = if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        ErrorKind::NetworkTimeout
    } else if let Some(status) = e.status() {
        classify_status(status)
    } else {
        ErrorKind::ExtractorFailure
    };
    ExtractError::new(kind, e.to_string())
}

fn write_error(path: &Path, e: std::io::Error) -> ExtractError {
    // ENOSPC, EROFS, EDQUOT
    let unwritable = e.kind() == std::io::ErrorKind::PermissionDenied
        || matches!(e.raw_os_error(), Some(28) | Some(30) | Some(122));
    let kind = if unwritable {
        ErrorKind::DestinationUnwritable
    } else {
        ErrorKind::ExtractorFailure
    };
    ExtractError::new(kind, format!("Failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubetracks_common::{AudioFormat, Quality};

    fn job(url: &str, format: AudioFormat) -> JobSpec {
        JobSpec::new(url, format, Quality::High, "out").unwrap()
    }

    #[test]
    fn test_supports_matching_extension_only() {
        let http = HttpExtractor::new(Duration::from_secs(5)).unwrap();
        assert!(http.supports(&job("https://cdn.example.com/a/Track.MP3", AudioFormat::Mp3)));
        assert!(!http.supports(&job("https://cdn.example.com/a/track.mp3", AudioFormat::Flac)));
        assert!(!http.supports(&job("https://cdn.example.com/a/track", AudioFormat::Mp3)));
        assert!(!http.supports(&job("https://youtu.be/abc", AudioFormat::Mp3)));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ErrorKind::ContentRemoved);
        assert_eq!(classify_status(StatusCode::GONE), ErrorKind::ContentRemoved);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorKind::AuthenticationRequired);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), ErrorKind::RateLimited);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ErrorKind::ExtractorFailure);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ErrorKind::InvalidUrl);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("https://example.com/a/b/song.ogg").as_deref(), Some("song.ogg"));
        assert_eq!(file_name("https://example.com/a/b/").as_deref(), Some("b"));
        assert_eq!(file_name("https://example.com/"), None);
    }

    #[test]
    fn test_partial_file_removed_unless_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let dropped = dir.path().join(".a.mp3.part");
        let kept = dir.path().join(".b.mp3.part");
        std::fs::write(&dropped, b"half").unwrap();
        std::fs::write(&kept, b"whole").unwrap();

        drop(PartialFile::new(dropped.clone()));
        PartialFile::new(kept.clone()).keep();

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_truncated_body_leaves_no_partial_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly ten b")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let dir = tempfile::TempDir::new().unwrap();
        let job = JobSpec::new(
            &format!("http://127.0.0.1:{}/track.mp3", port),
            AudioFormat::Mp3,
            Quality::High,
            dir.path(),
        )
        .unwrap();
        let http = HttpExtractor::new(Duration::from_secs(5)).unwrap();

        let err = http.extract(&job).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::NetworkTimeout);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_permission_denied_is_unwritable() {
        let e = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(write_error(Path::new("x"), e).kind, ErrorKind::DestinationUnwritable);
        let e = std::io::Error::from(std::io::ErrorKind::Interrupted);
        assert_eq!(write_error(Path::new("x"), e).kind, ErrorKind::ExtractorFailure);
    }
}
