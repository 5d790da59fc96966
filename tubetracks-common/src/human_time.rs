//! Human-readable duration formatting for progress and summary output

use std::time::Duration;

/// Format selection thresholds (seconds)
const SHORT_FORMAT_MAX: u64 = 100; // < 100s → X.XXs
const MEDIUM_FORMAT_MAX: u64 = 6000; // < 100m → M:SS.Xs
                                     // >= 100m → H:MM:SS

/// Format a duration by magnitude
///
/// ```
/// use std::time::Duration;
/// use tubetracks_common::human_time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(4250)), "4.25s");
/// assert_eq!(format_duration(Duration::from_secs(330)), "5:30.0s");
/// assert_eq!(format_duration(Duration::from_secs(3661 * 2)), "2:02:02");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < SHORT_FORMAT_MAX {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < MEDIUM_FORMAT_MAX {
        let minutes = secs / 60;
        let rest = duration.as_secs_f64() - (minutes * 60) as f64;
        format!("{}:{:04.1}s", minutes, rest)
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}:{:02}:{:02}", hours, mins, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_format() {
        assert_eq!(format_duration(Duration::ZERO), "0.00s");
        assert_eq!(format_duration(Duration::from_millis(99_990)), "99.99s");
    }

    #[test]
    fn test_medium_format() {
        assert_eq!(format_duration(Duration::from_secs(100)), "1:40.0s");
        assert_eq!(format_duration(Duration::from_millis(125_500)), "2:05.5s");
    }

    #[test]
    fn test_long_format() {
        assert_eq!(format_duration(Duration::from_secs(6000)), "1:40:00");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "25:01:01");
    }
}
