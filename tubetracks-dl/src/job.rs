//! Job specifications
//!
//! A [`JobSpec`] is the normalized, immutable description of one requested
//! download. Its [`JobId`] is the SHA-256 of the normalized URL and the output
//! format, so the same track requested twice (even through a share link with
//! tracking parameters) maps to the same id and is only downloaded once.

use crate::error::ValidationError;
use reqwest::Url;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tubetracks_common::{AudioFormat, Quality};

/// Query parameters that never change which media a URL points to
const TRACKING_PARAMS: &[&str] = &["si", "feature", "fbclid", "gclid", "igshid", "pp"];

/// Stable job identity: lowercase hex SHA-256, 64 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub const LEN: usize = 64;

    /// Hash a normalized URL together with the output format
    pub fn compute(normalized_url: &str, format: AudioFormat) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized_url.as_bytes());
        hasher.update(b"\n");
        hasher.update(format.as_str().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Accept only well-formed ids (used when reading the archive)
    pub fn parse(text: &str) -> Option<Self> {
        let well_formed = text.len() == Self::LEN
            && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        well_formed.then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content platform, detected from the URL host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    SoundCloud,
    TikTok,
    Instagram,
    Generic,
}

impl Platform {
    pub fn detect(host: &str) -> Self {
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

        if matches("youtube.com") || host == "youtu.be" {
            Platform::YouTube
        } else if matches("soundcloud.com") {
            Platform::SoundCloud
        } else if matches("tiktok.com") {
            Platform::TikTok
        } else if matches("instagram.com") {
            Platform::Instagram
        } else {
            Platform::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::SoundCloud => "soundcloud",
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Generic => "generic",
        }
    }
}

/// Normalize a user-supplied URL
///
/// - missing scheme defaults to `https`
/// - host lowercased, `www.` / `m.` prefixes dropped
/// - fragment and tracking parameters (`utm_*`, `si`, `feature`, ...) removed
/// - YouTube share and shorts links rewritten to `watch?v=<id>`, other
///   watch parameters (playlist, start time) dropped
pub fn normalize_url(raw: &str) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let invalid = |reason: String| ValidationError::InvalidUrl {
        url: trimmed.to_string(),
        reason,
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ValidationError::UnsupportedScheme {
            url: trimmed.to_string(),
            scheme: url.scheme().to_string(),
        });
    }

    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?
        .to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(&host)
        .to_string();
    if !host.contains('.') && host != "localhost" && url.port().is_none() {
        return Err(invalid(format!("'{}' is not a valid host", host)));
    }
    url.set_host(Some(&host)).map_err(|e| invalid(e.to_string()))?;
    url.set_fragment(None);

    if let Some(video_id) = youtube_video_id(&url, &host) {
        let canonical = format!("{}://{}/watch?v={}", url.scheme(), canonical_youtube_host(&host), video_id);
        return Url::parse(&canonical).map_err(|e| invalid(e.to_string()));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }

    Ok(url)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

fn canonical_youtube_host(host: &str) -> &str {
    if host == "youtu.be" {
        "youtube.com"
    } else {
        host
    }
}

/// Whether `raw` names a playlist rather than a single track
///
/// YouTube `playlist?list=...` pages and SoundCloud `/<user>/sets/<name>`
/// pages qualify. A watch link that also carries `list=` is a single video.
pub fn is_playlist_url(raw: &str) -> bool {
    let Ok(url) = normalize_url(raw) else {
        return false;
    };
    let host = url.host_str().unwrap_or_default();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    match Platform::detect(host) {
        Platform::YouTube => {
            segments.first() == Some(&"playlist") && url.query_pairs().any(|(key, _)| key == "list")
        }
        Platform::SoundCloud => segments.len() >= 3 && segments[1] == "sets",
        _ => false,
    }
}

/// Video id of a single-video YouTube link
fn youtube_video_id(url: &Url, host: &str) -> Option<String> {
    if Platform::detect(host) != Platform::YouTube {
        return None;
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let id = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else {
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("shorts") | Some("live") => segments.next().map(str::to_string),
            _ => None,
        }
    };

    id.filter(|id| !id.is_empty())
}

/// One requested download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    id: JobId,
    source_url: String,
    platform: Platform,
    format: AudioFormat,
    quality: Quality,
    dest_dir: PathBuf,
}

impl JobSpec {
    /// Validate and normalize a request
    pub fn new(
        url: &str,
        format: AudioFormat,
        quality: Quality,
        dest_dir: impl Into<PathBuf>,
    ) -> Result<Self, ValidationError> {
        let dest_dir = dest_dir.into();
        if dest_dir.as_os_str().is_empty() {
            return Err(ValidationError::EmptyDestination);
        }

        let url = normalize_url(url)?;
        let platform = url.host_str().map(Platform::detect).unwrap_or(Platform::Generic);
        let source_url = url.to_string();

        Ok(Self {
            id: JobId::compute(&source_url, format),
            source_url,
            platform,
            format,
            quality,
            dest_dir,
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Directory the output file is written into
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }
}

/// Settings shared by every job of a run
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub format: AudioFormat,
    pub quality: Quality,
    pub dest_dir: PathBuf,
}

impl JobTemplate {
    pub fn job(&self, url: &str) -> Result<JobSpec, ValidationError> {
        JobSpec::new(url, self.format, self.quality, self.dest_dir.clone())
    }
}

/// Build jobs for every URL, separating out the ones that fail validation
pub fn build_jobs<I, S>(urls: I, template: &JobTemplate) -> (Vec<JobSpec>, Vec<(String, ValidationError)>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut jobs = Vec::new();
    let mut rejected = Vec::new();

    for url in urls {
        let url = url.as_ref();
        match template.job(url) {
            Ok(job) => jobs.push(job),
            Err(e) => rejected.push((url.to_string(), e)),
        }
    }

    (jobs, rejected)
}

/// Parse batch file contents: one URL per line, blank lines and `#`/`;`
/// comments ignored
pub fn parse_batch(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
        .map(str::to_string)
        .collect()
}

pub fn read_batch_file(path: &Path) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_batch(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(raw: &str) -> String {
        normalize_url(raw).unwrap().to_string()
    }

    #[test]
    fn test_youtube_links_share_one_form() {
        let canonical = "https://youtube.com/watch?v=dQw4w9WgXcQ";
        assert_eq!(normalized("https://youtu.be/dQw4w9WgXcQ?si=abc123"), canonical);
        assert_eq!(normalized("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1&t=42"), canonical);
        assert_eq!(normalized("https://m.youtube.com/shorts/dQw4w9WgXcQ"), canonical);
        assert_eq!(normalized("youtube.com/watch?v=dQw4w9WgXcQ#t=10"), canonical);
    }

    #[test]
    fn test_tracking_params_and_fragment_removed() {
        assert_eq!(
            normalized("https://SoundCloud.com/artist/track?utm_source=x&fbclid=y&in=sets/abc#frag"),
            "https://soundcloud.com/artist/track?in=sets%2Fabc"
        );
        assert_eq!(
            normalized("https://example.com/audio/song.mp3?utm_medium=mail"),
            "https://example.com/audio/song.mp3"
        );
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert_eq!(normalize_url("   "), Err(ValidationError::EmptyUrl));
        assert!(matches!(
            normalize_url("ftp://example.com/a.mp3"),
            Err(ValidationError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            normalize_url("not a url"),
            Err(ValidationError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_playlist_urls() {
        assert!(is_playlist_url("https://www.youtube.com/playlist?list=PLabc&si=x"));
        assert!(is_playlist_url("soundcloud.com/some-artist/sets/summer-mix"));
        assert!(!is_playlist_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLabc"));
        assert!(!is_playlist_url("https://youtube.com/playlist"));
        assert!(!is_playlist_url("https://soundcloud.com/some-artist/track-one"));
        assert!(!is_playlist_url("not a url"));
        assert_eq!(
            normalized("https://www.youtube.com/playlist?list=PLabc&feature=share"),
            "https://youtube.com/playlist?list=PLabc"
        );
    }

    #[test]
    fn test_platform_detection() {
        assert_eq!(Platform::detect("youtube.com"), Platform::YouTube);
        assert_eq!(Platform::detect("music.youtube.com"), Platform::YouTube);
        assert_eq!(Platform::detect("vm.tiktok.com"), Platform::TikTok);
        assert_eq!(Platform::detect("instagram.com"), Platform::Instagram);
        assert_eq!(Platform::detect("notyoutube.com"), Platform::Generic);
    }

    #[test]
    fn test_id_is_stable_and_format_sensitive() {
        let a = JobSpec::new("https://youtu.be/abc", AudioFormat::Mp3, Quality::High, "out").unwrap();
        let b = JobSpec::new("https://www.youtube.com/watch?v=abc", AudioFormat::Mp3, Quality::Low, "elsewhere").unwrap();
        let c = JobSpec::new("https://youtu.be/abc", AudioFormat::Flac, Quality::High, "out").unwrap();

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().as_str().len(), JobId::LEN);
        assert_eq!(JobId::parse(a.id().as_str()), Some(a.id().clone()));
        assert_eq!(a.platform(), Platform::YouTube);
    }

    #[test]
    fn test_job_id_parse_rejects_malformed() {
        assert!(JobId::parse("abc").is_none());
        assert!(JobId::parse(&"G".repeat(64)).is_none());
        assert!(JobId::parse(&"A".repeat(64)).is_none());
        assert!(JobId::parse(&"a".repeat(64)).is_some());
    }

    #[test]
    fn test_empty_destination_rejected() {
        let result = JobSpec::new("https://example.com/a.mp3", AudioFormat::Mp3, Quality::High, "");
        assert_eq!(result, Err(ValidationError::EmptyDestination));
    }

    #[test]
    fn test_batch_parsing_and_build() {
        let urls = parse_batch(
            "# favourites\n\nhttps://youtu.be/one\n  ; disabled line\n  https://example.com/x.mp3  \nnope nope\n",
        );
        assert_eq!(urls, vec!["https://youtu.be/one", "https://example.com/x.mp3", "nope nope"]);

        let template = JobTemplate {
            format: AudioFormat::Mp3,
            quality: Quality::High,
            dest_dir: PathBuf::from("out"),
        };
        let (jobs, rejected) = build_jobs(&urls, &template);
        assert_eq!(jobs.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "nope nope");
    }
}
