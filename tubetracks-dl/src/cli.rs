//! Command-line arguments for the `tubetracks` binary
//!
//! Flags override the environment and the TOML file; see
//! [`tubetracks_common::config`] for the full priority order.

use crate::job::read_batch_file;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tubetracks_common::config::TomlConfig;
use tubetracks_common::{AudioFormat, Quality};

#[derive(Parser, Debug)]
#[command(name = "tubetracks")]
#[command(about = "Download audio from media URLs with bounded concurrency, retries and a resumable archive")]
#[command(version)]
pub struct Cli {
    /// URLs to download
    pub urls: Vec<String>,

    /// Read URLs from a file, one per line (`#` and `;` start comments)
    #[arg(short = 'b', long = "batch-file", value_name = "FILE")]
    pub batch_files: Vec<PathBuf>,

    /// Output format: mp3, m4a, opus, flac, wav, ogg
    #[arg(short, long)]
    pub format: Option<AudioFormat>,

    /// Quality preset: best, high, medium, low
    #[arg(short, long)]
    pub quality: Option<Quality>,

    /// Directory downloads are written to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum simultaneous downloads (1-32)
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Download archive file
    #[arg(long, value_name = "FILE", conflicts_with = "no_archive")]
    pub archive: Option<PathBuf>,

    /// Neither consult nor update the download archive
    #[arg(long)]
    pub no_archive: bool,

    /// Retries after the first attempt for transient failures
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Configuration file (default: platform config dir, or TUBETRACKS_CONFIG)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write a JSON report of every job to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Write the effective configuration (to FILE, or the config file in use)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub write_config: Option<Option<PathBuf>>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only warnings and errors
    #[arg(short = 'Q', long)]
    pub quiet: bool,
}

impl Cli {
    /// Overlay command-line values onto the configuration
    pub fn apply_to(&self, config: &mut TomlConfig) {
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(path) = &self.archive {
            config.archive = true;
            config.archive_path = Some(path.clone());
        }
        if self.no_archive {
            config.archive = false;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(timeout) = self.timeout {
            config.attempt_timeout_secs = timeout;
        }
    }

    /// Positional URLs followed by batch file contents, in order
    pub fn collect_urls(&self) -> anyhow::Result<Vec<String>> {
        let mut urls = self.urls.clone();
        for path in &self.batch_files {
            let batch = read_batch_file(path)
                .with_context(|| format!("Failed to read batch file {}", path.display()))?;
            urls.extend(batch);
        }
        Ok(urls)
    }

    pub fn log_level_override(&self) -> Option<Level> {
        if self.verbose {
            Some(Level::DEBUG)
        } else if self.quiet {
            Some(Level::WARN)
        } else {
            None
        }
    }
}
