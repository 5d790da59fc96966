//! yt-dlp subprocess extractor
//!
//! Runs one `yt-dlp` process per attempt. yt-dlp's own retries are left at
//! their defaults; the worker pool applies its retry policy on top.

use super::Extractor;
use crate::error::{ErrorKind, ExtractError};
use crate::job::JobSpec;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};
use tubetracks_common::{AudioFormat, Quality};

/// Longest stderr excerpt carried in an error message
const MESSAGE_LIMIT: usize = 300;

pub struct YtDlpExtractor {
    binary: PathBuf,
    filename_template: String,
}

impl YtDlpExtractor {
    pub fn new(binary: PathBuf, filename_template: String) -> Self {
        Self {
            binary,
            filename_template,
        }
    }

    /// Full argument list for one job
    pub fn arguments(&self, job: &JobSpec) -> Vec<String> {
        let output = job
            .dest_dir()
            .join(format!("{}.%(ext)s", output_template(&self.filename_template)));

        vec![
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            codec(job.format()).to_string(),
            "--audio-quality".to_string(),
            audio_quality(job.quality()),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--no-simulate".to_string(),
            "--output".to_string(),
            output.to_string_lossy().into_owned(),
            "--".to_string(),
            job.source_url().to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "ytdlp"
    }

    fn supports(&self, job: &JobSpec) -> bool {
        job.source_url().starts_with("http://") || job.source_url().starts_with("https://")
    }

    async fn extract(&self, job: &JobSpec) -> Result<PathBuf, ExtractError> {
        let args = self.arguments(job);
        debug!(binary = %self.binary.display(), ?args, "Spawning yt-dlp");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.binary, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let kind = classify_failure(&stderr);
            let message = failure_message(&stderr, output.status.code());
            warn!(
                job_id = %job.id().short(),
                error_kind = %kind,
                exit_code = ?output.status.code(),
                "yt-dlp failed"
            );
            return Err(ExtractError::new(kind, message));
        }

        last_line(&stdout).map(PathBuf::from).ok_or_else(|| {
            ExtractError::new(
                ErrorKind::ExtractorFailure,
                "yt-dlp exited successfully but reported no output file",
            )
        })
    }
}

/// yt-dlp `--audio-format` value
fn codec(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Ogg => "vorbis",
        other => other.as_str(),
    }
}

/// yt-dlp `--audio-quality` value: `0` is best VBR
fn audio_quality(quality: Quality) -> String {
    match quality.bitrate_kbps() {
        Some(kbps) => format!("{}K", kbps),
        None => "0".to_string(),
    }
}

/// Translate `{title}`-style placeholders into yt-dlp `%(title)s` fields
pub fn output_template(template: &str) -> String {
    let escaped = template.replace('%', "%%");
    let mut out = String::with_capacity(escaped.len() + 8);
    let mut rest = escaped.as_str();

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(len) => {
                let field = &rest[start + 1..start + len];
                out.push_str(&format!("%({})s", field));
                rest = &rest[start + len + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn spawn_error(binary: &Path, e: std::io::Error) -> ExtractError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ExtractError::new(
            ErrorKind::ExtractorMissing,
            format!("{} not found; install yt-dlp or set ytdlp_path", binary.display()),
        )
    } else {
        ExtractError::new(
            ErrorKind::ExtractorFailure,
            format!("Failed to start {}: {}", binary.display(), e),
        )
    }
}

/// Map yt-dlp stderr to an error kind
///
/// Only the `ERROR:` lines are read, with URLs and the `[extractor] id:`
/// prefix removed, so text chosen by the uploader cannot steer the result.
/// Order matters: "requested format is not available" must not be read as
/// removed content, and disk errors win over everything else.
pub fn classify_failure(stderr: &str) -> ErrorKind {
    let s = error_text(stderr).to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| s.contains(n));

    if any(&["no space left", "permission denied", "read-only file system", "disk quota exceeded"]) {
        ErrorKind::DestinationUnwritable
    } else if any(&["http error 429", "too many requests", "rate-limit", "rate limit"]) {
        ErrorKind::RateLimited
    } else if any(&[
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "temporary failure in name resolution",
        "network is unreachable",
        "remote end closed connection",
    ]) {
        ErrorKind::NetworkTimeout
    } else if any(&["unsupported url", "is not a valid url"]) {
        ErrorKind::UnsupportedSource
    } else if any(&["requested format is not available", "unsupported audio format"]) {
        ErrorKind::UnsupportedFormat
    } else if any(&[
        "video unavailable",
        "has been removed",
        "private video",
        "this video is private",
        "http error 404",
        "does not exist",
        "no longer available",
    ]) {
        ErrorKind::ContentRemoved
    } else if any(&["sign in", "login required", "log in", "members-only", "cookies"]) {
        ErrorKind::AuthenticationRequired
    } else if any(&["ffmpeg not found", "ffprobe and ffmpeg not found", "ffprobe/avprobe and ffmpeg/avconv not found"]) {
        ErrorKind::ExtractorMissing
    } else {
        ErrorKind::ExtractorFailure
    }
}

/// Diagnostic text of the `ERROR:` lines (every line if there are none)
fn error_text(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).collect();
    let errors: Vec<&str> = stderr
        .lines()
        .filter_map(|l| l.trim().strip_prefix("ERROR:"))
        .collect();
    let selected = if errors.is_empty() { lines } else { errors };

    selected
        .into_iter()
        .map(|line| {
            line.split_whitespace()
                .filter(|word| !word.contains("://"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .map(|line| strip_extractor_prefix(&line).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop a leading `[youtube] <id>:` so video ids are not matched as words
fn strip_extractor_prefix(line: &str) -> &str {
    let Some(rest) = line.strip_prefix('[') else {
        return line;
    };
    let Some((_, after)) = rest.split_once("] ") else {
        return line;
    };
    match after.split_once(": ") {
        Some((id, message)) if !id.contains(char::is_whitespace) => message,
        _ => after,
    }
}

fn failure_message(stderr: &str, code: Option<i32>) -> String {
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| last_line(stderr));

    match line {
        Some(line) => line.chars().take(MESSAGE_LIMIT).collect(),
        None => format!("yt-dlp exited with status {:?}", code),
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        let cases = [
            ("ERROR: [youtube] abc: Video unavailable", ErrorKind::ContentRemoved),
            ("ERROR: unable to download video data: HTTP Error 429: Too Many Requests", ErrorKind::RateLimited),
            ("ERROR: [generic] Unsupported URL: https://example.com/", ErrorKind::UnsupportedSource),
            ("ERROR: [youtube] abc: Requested format is not available", ErrorKind::UnsupportedFormat),
            ("ERROR: [youtube] abc: Sign in to confirm your age", ErrorKind::AuthenticationRequired),
            ("ERROR: Postprocessing: ffprobe and ffmpeg not found", ErrorKind::ExtractorMissing),
            ("ERROR: unable to write data: [Errno 28] No space left on device", ErrorKind::DestinationUnwritable),
            ("ERROR: <urlopen error [Errno 110] Connection timed out>", ErrorKind::NetworkTimeout),
            ("ERROR: something new and unexpected", ErrorKind::ExtractorFailure),
        ];

        for (stderr, expected) in cases {
            assert_eq!(classify_failure(stderr), expected, "{stderr}");
        }
    }

    #[test]
    fn test_classify_failure_ignores_url_and_id_text() {
        let cases = [
            ("ERROR: [generic] Unsupported URL: https://example.com/timeout-remix", ErrorKind::UnsupportedSource),
            ("ERROR: [generic] Unsupported URL: https://example.com/rate-limit/sign-in", ErrorKind::UnsupportedSource),
            ("ERROR: [youtube] timeoutABCD: Video unavailable", ErrorKind::ContentRemoved),
            ("ERROR: [youtube] abc: Private video. Sign in if you've been granted access", ErrorKind::ContentRemoved),
        ];

        for (stderr, expected) in cases {
            assert_eq!(classify_failure(stderr), expected, "{stderr}");
        }
    }

    #[test]
    fn test_classify_failure_reads_only_error_lines() {
        let stderr = "[generic] Extracting URL: https://example.com/login-timeout\n\
                      WARNING: [generic] Falling back on generic information extractor\n\
                      ERROR: [generic] Unsupported URL: https://example.com/login-timeout\n";
        assert_eq!(classify_failure(stderr), ErrorKind::UnsupportedSource);
        assert_eq!(classify_failure("Connection reset by peer"), ErrorKind::NetworkTimeout);
    }

    #[test]
    fn test_output_template() {
        assert_eq!(output_template("{title}"), "%(title)s");
        assert_eq!(output_template("{uploader} - {title} [{id}]"), "%(uploader)s - %(title)s [%(id)s]");
        assert_eq!(output_template("100% {title"), "100%% {title");
    }

    #[test]
    fn test_arguments() {
        let extractor = YtDlpExtractor::new(PathBuf::from("yt-dlp"), "{title}".to_string());
        let job = JobSpec::new("https://youtu.be/abc", AudioFormat::Ogg, Quality::Best, "/music").unwrap();
        let args = extractor.arguments(&job);

        let after = |flag: &str| {
            let index = args.iter().position(|a| a == flag).unwrap();
            args[index + 1].clone()
        };
        assert_eq!(after("--audio-format"), "vorbis");
        assert_eq!(after("--audio-quality"), "0");
        assert_eq!(after("--output"), "/music/%(title)s.%(ext)s");
        assert_eq!(args.last().unwrap(), "https://youtube.com/watch?v=abc");
        assert!(args.contains(&"--no-playlist".to_string()));
    }

    #[test]
    fn test_failure_message_prefers_error_line() {
        let stderr = "WARNING: noise\nERROR: Video unavailable\n[debug] trailing\n";
        assert_eq!(failure_message(stderr, Some(1)), "ERROR: Video unavailable");
        assert_eq!(failure_message("", Some(2)), "yt-dlp exited with status Some(2)");
    }

    #[tokio::test]
    async fn test_missing_binary_is_permanent() {
        let extractor = YtDlpExtractor::new(
            PathBuf::from("/nonexistent/tubetracks-test/yt-dlp"),
            "{title}".to_string(),
        );
        let job = JobSpec::new("https://youtu.be/abc", AudioFormat::Mp3, Quality::High, "/tmp").unwrap();
        let err = extractor.extract(&job).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExtractorMissing);
    }
}
