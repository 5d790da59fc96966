//! Configuration loading, resolution and validation
//!
//! All tunable behavior lives in one typed [`TomlConfig`] with built-in defaults.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`TUBETRACKS_OUTPUT_DIR`, `TUBETRACKS_CONCURRENCY`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! A missing configuration file is not an error: a warning is logged and the
//! defaults are used. The merged configuration is validated once at startup.

use crate::{AudioFormat, Error, Quality, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "TUBETRACKS_CONFIG";
/// Environment variable overriding `output_dir`
pub const OUTPUT_DIR_ENV_VAR: &str = "TUBETRACKS_OUTPUT_DIR";
/// Environment variable overriding `concurrency`
pub const CONCURRENCY_ENV_VAR: &str = "TUBETRACKS_CONCURRENCY";

/// Upper bound for simultaneous download attempts
pub const MAX_CONCURRENCY: usize = 32;

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Directory downloads are written to
    ///
    /// Default: `downloads` (relative to the working directory)
    pub output_dir: PathBuf,

    /// Output audio format. Default: mp3
    pub format: AudioFormat,

    /// Quality preset. Default: high (320 kbps)
    pub quality: Quality,

    /// Maximum simultaneous download attempts (1..=32). Default: 3
    pub concurrency: usize,

    /// Whether the download archive is consulted and updated. Default: true
    pub archive: bool,

    /// Archive file location
    ///
    /// Default: `<local data dir>/tubetracks/archive.txt`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,

    /// Output file name template, `{title}`, `{id}` and `{uploader}` are expanded
    /// by the extractor. Default: `{title}`
    pub filename_template: String,

    /// Per-attempt timeout in seconds. Default: 600
    pub attempt_timeout_secs: u64,

    /// Grace period for in-flight attempts after cancellation. Default: 10
    pub cancel_grace_secs: u64,

    /// yt-dlp executable (name looked up on PATH, or absolute path). Default: `yt-dlp`
    pub ytdlp_path: PathBuf,

    /// Retry/backoff settings
    pub retry: RetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Retry configuration for transient download failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Default: 5
    pub max_retries: u32,
    /// Base backoff delay in milliseconds. Default: 500
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds. Default: 30000
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay, in [0, 1). Default: 0.2
    pub jitter: f64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            format: AudioFormat::default(),
            quality: Quality::default(),
            concurrency: 3,
            archive: true,
            archive_path: None,
            filename_template: "{title}".to_string(),
            attempt_timeout_secs: 600,
            cancel_grace_secs: 10,
            ytdlp_path: PathBuf::from("yt-dlp"),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Locate and load the configuration file
    ///
    /// An explicit path (command line, then `TUBETRACKS_CONFIG`) must exist.
    /// The platform default location is optional.
    ///
    /// Returns the configuration and the file it came from, if any.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        if let Some(path) = explicit {
            let config = Self::load(&path)?;
            return Ok((config, Some(path)));
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                let config = Self::load(&path)?;
                Ok((config, Some(path)))
            }
            Some(path) => {
                warn!(
                    "Config file not found at {}, using built-in defaults",
                    path.display()
                );
                Ok((Self::default(), None))
            }
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                Ok((Self::default(), None))
            }
        }
    }

    /// Apply `TUBETRACKS_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(dir) = std::env::var_os(OUTPUT_DIR_ENV_VAR) {
            self.output_dir = PathBuf::from(dir);
        }

        if let Ok(value) = std::env::var(CONCURRENCY_ENV_VAR) {
            self.concurrency = value.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a positive integer, got '{}'",
                    CONCURRENCY_ENV_VAR, value
                ))
            })?;
        }

        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(Error::Config(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }

        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(Error::Config(format!(
                "retry.jitter must be in [0, 1), got {}",
                self.retry.jitter
            )));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        if self.attempt_timeout_secs == 0 {
            return Err(Error::Config(
                "attempt_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let template = self.filename_template.trim();
        if template.is_empty() || template.contains('/') || template.contains('\\') {
            return Err(Error::Config(format!(
                "filename_template must be a non-empty file name, got '{}'",
                self.filename_template
            )));
        }

        crate::logging::parse_level(&self.logging.level)?;

        Ok(())
    }

    /// Archive file to use, `None` when the archive is disabled
    pub fn effective_archive_path(&self) -> Option<PathBuf> {
        if !self.archive {
            return None;
        }
        Some(
            self.archive_path
                .clone()
                .unwrap_or_else(default_archive_path),
        )
    }
}

/// Default configuration file location: `<config dir>/tubetracks/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tubetracks").join("config.toml"))
}

/// Default archive location: `<local data dir>/tubetracks/archive.txt`
pub fn default_archive_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tubetracks").join("archive.txt"))
        .unwrap_or_else(|| PathBuf::from("tubetracks-archive.txt"))
}

/// Write configuration as TOML
///
/// Writes to a sibling temporary file first and renames it over the target,
/// so a crash never leaves a half-written config behind.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Invalid config path: {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    info!("Configuration written to {}", path.display());
    Ok(())
}
