use std::path::PathBuf;

use chrono::Duration;
use rollcall_core::{Cooldown, CooldownPolicy, EnrollPolicy, MatchPolicy};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Optional path to a 32-byte key file; when set, template payloads
    /// are sealed at rest.
    pub key_path: Option<PathBuf>,
    /// Acceptance threshold on the [0, 1] match score.
    pub match_threshold: f32,
    /// Minimum quality-accepted samples per enrollment.
    pub min_samples: usize,
    /// Floor for the enrollment self-consistency gate.
    pub min_sample_similarity: f32,
    /// Attendance dedup window.
    pub cooldown: Cooldown,
    /// Timeout in seconds for one verify or enroll round-trip.
    pub verify_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rollcall.db"));

        Self {
            db_path,
            key_path: std::env::var("ROLLCALL_KEY_PATH").ok().map(PathBuf::from),
            match_threshold: env_f32(
                "ROLLCALL_MATCH_THRESHOLD",
                rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD,
            ),
            min_samples: env_usize(
                "ROLLCALL_MIN_SAMPLES",
                rollcall_core::enroll::DEFAULT_MIN_SAMPLES,
            ),
            min_sample_similarity: env_f32(
                "ROLLCALL_MIN_SAMPLE_SIMILARITY",
                rollcall_core::enroll::DEFAULT_MIN_SAMPLE_SIMILARITY,
            ),
            cooldown: parse_cooldown(std::env::var("ROLLCALL_COOLDOWN").ok().as_deref()),
            verify_timeout_secs: env_u64("ROLLCALL_VERIFY_TIMEOUT_SECS", 10),
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            threshold: self.match_threshold,
            ..MatchPolicy::default()
        }
    }

    pub fn enroll_policy(&self) -> EnrollPolicy {
        EnrollPolicy {
            min_samples: self.min_samples,
            min_sample_similarity: self.min_sample_similarity,
        }
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            window: self.cooldown,
        }
    }

    pub fn cooldown_label(&self) -> String {
        match self.cooldown {
            Cooldown::CalendarDay => "calendar-day".to_string(),
            Cooldown::Rolling(window) => format!("rolling-{}s", window.num_seconds()),
        }
    }
}

/// `ROLLCALL_COOLDOWN` is either `day` (one record per UTC calendar day)
/// or a positive number of seconds for a rolling window. Anything else
/// falls back to the calendar-day default.
fn parse_cooldown(raw: Option<&str>) -> Cooldown {
    match raw {
        None | Some("day") => Cooldown::CalendarDay,
        Some(value) => value
            .parse::<i64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(|secs| Cooldown::Rolling(Duration::seconds(secs)))
            .unwrap_or(Cooldown::CalendarDay),
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_defaults_to_calendar_day() {
        assert_eq!(parse_cooldown(None), Cooldown::CalendarDay);
        assert_eq!(parse_cooldown(Some("day")), Cooldown::CalendarDay);
        assert_eq!(parse_cooldown(Some("not-a-number")), Cooldown::CalendarDay);
        assert_eq!(parse_cooldown(Some("-30")), Cooldown::CalendarDay);
    }

    #[test]
    fn cooldown_seconds_become_a_rolling_window() {
        assert_eq!(
            parse_cooldown(Some("900")),
            Cooldown::Rolling(Duration::seconds(900))
        );
    }
}
