//! # TubeTracks Common Library
//!
//! Shared code for the TubeTracks downloader:
//! - Error types
//! - Media format and quality definitions
//! - TOML configuration loading, validation and write-back
//! - Tracing subscriber setup
//! - Human-readable duration formatting

pub mod config;
pub mod error;
pub mod human_time;
pub mod logging;
pub mod media;

pub use error::{Error, Result};
pub use media::{AudioFormat, Quality};
