//! Playlist expansion
//!
//! Playlist URLs are turned into their entry URLs before jobs are built, so
//! every track becomes its own job with its own id, retries and archive entry.
//! The yt-dlp source lists entries with `--flat-playlist` and downloads
//! nothing.

use super::ytdlp::classify_failure;
use crate::error::{ErrorKind, ExtractError};
use crate::job::is_playlist_url;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lists the entries of a playlist
#[async_trait::async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn entries(&self, playlist_url: &str) -> Result<Vec<String>, ExtractError>;
}

pub struct YtDlpPlaylist {
    binary: PathBuf,
}

impl YtDlpPlaylist {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn arguments(playlist_url: &str) -> Vec<String> {
        vec![
            "--flat-playlist".to_string(),
            "--print".to_string(),
            "url".to_string(),
            "--no-warnings".to_string(),
            "--".to_string(),
            playlist_url.to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl PlaylistSource for YtDlpPlaylist {
    async fn entries(&self, playlist_url: &str) -> Result<Vec<String>, ExtractError> {
        let output = Command::new(&self.binary)
            .args(Self::arguments(playlist_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::NotFound {
                    ErrorKind::ExtractorMissing
                } else {
                    ErrorKind::ExtractorFailure
                };
                ExtractError::new(kind, format!("Failed to start {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .map(str::trim)
                .rfind(|l| !l.is_empty())
                .unwrap_or("yt-dlp could not list the playlist")
                .to_string();
            return Err(ExtractError::new(classify_failure(&stderr), message));
        }

        Ok(parse_entries(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Entry URLs from `--print url` output; other lines are ignored
pub fn parse_entries(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("http://") || l.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

/// URLs after playlist expansion
#[derive(Debug, Default)]
pub struct Expansion {
    /// Single-track URLs, playlist entries in place of their playlist
    pub urls: Vec<String>,
    /// Playlists that could not be listed
    pub failed: Vec<(String, ExtractError)>,
}

/// Replace every playlist URL with its entries, keeping input order
pub async fn expand_playlists(urls: Vec<String>, source: &dyn PlaylistSource) -> Expansion {
    let mut expansion = Expansion::default();

    for url in urls {
        if !is_playlist_url(&url) {
            expansion.urls.push(url);
            continue;
        }

        match source.entries(&url).await {
            Ok(entries) if entries.is_empty() => {
                warn!(url = %url, "Playlist has no entries");
            }
            Ok(entries) => {
                info!(url = %url, entries = entries.len(), "Expanded playlist");
                expansion.urls.extend(entries);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Could not list playlist");
                expansion.failed.push((url, e));
            }
        }
    }

    debug!(urls = expansion.urls.len(), failed = expansion.failed.len(), "Playlist expansion done");
    expansion
}
