use std::{fmt, sync::OnceLock};

use chrono::{Duration, NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,
    #[error("unrecognized duration '{0}' (expected e.g. 4h30m, 90m, 1h15m10s)")]
    Malformed(String),
    #[error("duration component out of range in '{0}'")]
    OutOfRange(String),
}

/// Light-on span as written by the operator, e.g. `4h30m`.
///
/// Components are kept as given, so `90m` stays 0h 90m and formats back to
/// `90m`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl Span {
    pub const fn new(hours: u32, minutes: u32, seconds: u32) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }

    pub fn total_seconds(self) -> u64 {
        self.hours as u64 * 3600 + self.minutes as u64 * 60 + self.seconds as u64
    }

    /// Span from `start` forward to `end`, wrapping past midnight.
    pub fn between(start: NaiveTime, end: NaiveTime) -> Self {
        let start = start.num_seconds_from_midnight() as u64;
        let end = end.num_seconds_from_midnight() as u64;
        let total = (end + SECONDS_PER_DAY - start) % SECONDS_PER_DAY;

        Self::new(
            (total / 3600) as u32,
            ((total % 3600) / 60) as u32,
            (total % 60) as u32,
        )
    }

    /// `start + self`, modulo 24 hours.
    pub fn end_from(self, start: NaiveTime) -> NaiveTime {
        let offset = (self.total_seconds() % SECONDS_PER_DAY) as i64;
        let (end, _) = start.overflowing_add_signed(Duration::seconds(offset));
        end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hours == 0 && self.minutes == 0 && self.seconds == 0 {
            return f.write_str("0s");
        }
        if self.hours > 0 {
            write!(f, "{}h", self.hours)?;
        }
        if self.minutes > 0 {
            write!(f, "{}m", self.minutes)?;
        }
        if self.seconds > 0 {
            write!(f, "{}s", self.seconds)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Span {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s)
    }
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:([0-9]+)h)?(?:([0-9]+)m)?(?:([0-9]+)s)?$")
            .expect("duration pattern is valid")
    })
}

/// Parses `[<n>h][<n>m][<n>s]`. At least one component is required.
pub fn parse_duration(input: &str) -> Result<Span, DurationParseError> {
    let normalized = input.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let captures = duration_pattern()
        .captures(&normalized)
        .ok_or_else(|| DurationParseError::Malformed(input.to_string()))?;

    // The pattern matches the empty string too; require a component.
    if captures.iter().skip(1).all(|group| group.is_none()) {
        return Err(DurationParseError::Malformed(input.to_string()));
    }

    let component = |index: usize| -> Result<u32, DurationParseError> {
        match captures.get(index) {
            Some(digits) => digits
                .as_str()
                .parse::<u32>()
                .map_err(|_| DurationParseError::OutOfRange(input.to_string())),
            None => Ok(0),
        }
    };

    Ok(Span::new(component(1)?, component(2)?, component(3)?))
}
