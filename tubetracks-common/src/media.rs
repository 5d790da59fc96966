//! Output audio formats and quality presets

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Audio container/codec requested for a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Opus,
    Flac,
    Wav,
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 6] = [
        AudioFormat::Mp3,
        AudioFormat::M4a,
        AudioFormat::Opus,
        AudioFormat::Flac,
        AudioFormat::Wav,
        AudioFormat::Ogg,
    ];

    /// Lowercase name, also used as the file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        AudioFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "unknown audio format '{}' (expected one of: mp3, m4a, opus, flac, wav, ogg)",
                    s
                ))
            })
    }
}

/// Audio quality preset
///
/// | Preset   | Bitrate            |
/// |----------|--------------------|
/// | `best`   | best available VBR |
/// | `high`   | 320 kbps           |
/// | `medium` | 192 kbps           |
/// | `low`    | 128 kbps           |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Best,
    #[default]
    High,
    Medium,
    Low,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
        }
    }

    /// Target bitrate in kbps, `None` for "best available"
    pub fn bitrate_kbps(&self) -> Option<u32> {
        match self {
            Quality::Best => None,
            Quality::High => Some(320),
            Quality::Medium => Some(192),
            Quality::Low => Some(128),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" | "0" => Ok(Quality::Best),
            "high" | "320" | "320k" => Ok(Quality::High),
            "medium" | "192" | "192k" => Ok(Quality::Medium),
            "low" | "128" | "128k" => Ok(Quality::Low),
            _ => Err(Error::InvalidInput(format!(
                "unknown quality '{}' (expected best, high, medium or low)",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_accepts_case_and_dot() {
        assert_eq!("MP3".parse::<AudioFormat>().unwrap(), AudioFormat::Mp3);
        assert_eq!(".flac".parse::<AudioFormat>().unwrap(), AudioFormat::Flac);
        assert!("aiff".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn test_quality_bitrates() {
        assert_eq!(Quality::Best.bitrate_kbps(), None);
        assert_eq!(Quality::High.bitrate_kbps(), Some(320));
        assert_eq!("192k".parse::<Quality>().unwrap(), Quality::Medium);
        assert_eq!(Quality::default(), Quality::High);
    }

    #[test]
    fn test_serde_lowercase_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: AudioFormat,
            quality: Quality,
        }

        let parsed: Wrapper = toml::from_str("format = \"opus\"\nquality = \"low\"").unwrap();
        assert_eq!(parsed.format, AudioFormat::Opus);
        assert_eq!(parsed.quality, Quality::Low);
    }
}
