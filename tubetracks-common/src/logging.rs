//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parse a configured log level name
pub fn parse_level(level: &str) -> Result<Level> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| Error::Config(format!("Unknown log level '{}'", level)))
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins when set. Otherwise `level_override` (from `--verbose`/`--quiet`)
/// or the configured level applies. When `logging.file` is set, output is appended
/// to that file without ANSI colors.
pub fn init_tracing(logging: &LoggingConfig, level_override: Option<Level>) -> Result<()> {
    let level = match level_override {
        Some(level) => level,
        None => parse_level(&logging.level)?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let installed = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}
