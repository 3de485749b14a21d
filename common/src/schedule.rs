use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Format of `AutoEmailNext` and of every timestamp the daemon writes.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Unit of an auto-email recurrence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Secs,
    Mins,
    #[default]
    Hours,
    Days,
    Weeks,
}

impl Period {
    pub const ALL: [Period; 5] = [Period::Secs, Period::Mins, Period::Hours, Period::Days, Period::Weeks];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Secs => "secs",
            Period::Mins => "mins",
            Period::Hours => "hours",
            Period::Days => "days",
            Period::Weeks => "weeks",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Period::Secs => 1,
            Period::Mins => 60,
            Period::Hours => 3600,
            Period::Days => 86_400,
            Period::Weeks => 7 * 86_400,
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "s" | "sec" | "secs" | "seconds" => Ok(Period::Secs),
            "m" | "min" | "mins" | "minutes" => Ok(Period::Mins),
            "h" | "hour" | "hours" => Ok(Period::Hours),
            "d" | "day" | "days" => Ok(Period::Days),
            "w" | "week" | "weeks" => Ok(Period::Weeks),
            _ => Err(anyhow!("Unknown period: {}", s)),
        }
    }
}

/// `count * period` as a duration. A count below one is treated as one so a
/// schedule always moves forward.
pub fn recurrence(count: i64, period: Period) -> Result<Duration> {
    let secs = count
        .max(1)
        .checked_mul(period.seconds())
        .ok_or_else(|| anyhow!("Recurrence of {} {} overflows", count, period))?;
    Duration::try_seconds(secs).ok_or_else(|| anyhow!("Recurrence of {} {} is out of range", count, period))
}

/// The next fire time after `now`.
pub fn calculate_next_time(now: NaiveDateTime, count: i64, period: Period) -> Result<NaiveDateTime> {
    let step = recurrence(count, period)?;
    now.checked_add_signed(step)
        .ok_or_else(|| anyhow!("Next time after {} {} is out of range", count, period))
}

pub fn parse_time(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TIME_FORMAT)
        .map_err(|e| anyhow!("Invalid time '{}': {}", s, e))
}

pub fn format_time(t: &NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Compact human form of a duration, e.g. `1d 2h 3m` or `45s`.
pub fn format_duration(d: Duration) -> String {
    let negative = d < Duration::zero();
    let total = d.num_seconds().abs();
    let (days, hours, mins, secs) = (total / 86_400, (total / 3600) % 24, (total / 60) % 60, total % 60);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if mins > 0 {
        parts.push(format!("{}m", mins));
    }
    if secs > 0 && days == 0 {
        parts.push(format!("{}s", secs));
    }
    if parts.is_empty() {
        parts.push("0s".to_string());
    }
    let s = parts.join(" ");
    if negative { format!("-{}", s) } else { s }
}
