//! Signed composite time ranges such as `-1y 3h 2m 6s`
//!
//! Accepted units, in mandatory order: `y`/`year(s)`, `mo`/`month(s)`,
//! `d`/`day(s)`, `h`/`hour(s)`, `m`/`minute(s)` and `s`/`second(s)`. A
//! leading sign applies to every component.

use chrono::{DateTime, Duration, Months, Utc};

use crate::error::{ValidationError, ValidationResult};

const UNITS: [(&[&str], &str); 6] = [
    (&["y", "year", "years"], "years"),
    (&["mo", "month", "months"], "months"),
    (&["d", "day", "days"], "days"),
    (&["h", "hour", "hours"], "hours"),
    (&["m", "minute", "minutes"], "minutes"),
    (&["s", "second", "seconds"], "seconds"),
];

/// A parsed time range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub negative: bool,
    pub years: u32,
    pub months: u32,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl TimeRange {
    pub fn parse(input: &str) -> ValidationResult<Self> {
        let invalid = || ValidationError::InvalidRange { value: input.to_string() };

        let mut rest = input.trim();
        let mut range = TimeRange::default();

        if let Some(stripped) = rest.strip_prefix('-') {
            range.negative = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped;
        }

        let mut next_unit = 0;
        let mut components = 0;

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }

            let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            if digits == 0 {
                return Err(invalid());
            }
            let count: u32 = rest[..digits].parse().map_err(|_| invalid())?;

            rest = rest[digits..].trim_start();
            let letters = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
            let unit = &rest[..letters];
            rest = &rest[letters..];

            let idx = UNITS[next_unit..]
                .iter()
                .position(|(names, _)| names.contains(&unit))
                .map(|offset| next_unit + offset)
                .ok_or_else(invalid)?;

            match idx {
                0 => range.years = count,
                1 => range.months = count,
                2 => range.days = i64::from(count),
                3 => range.hours = i64::from(count),
                4 => range.minutes = i64::from(count),
                _ => range.seconds = i64::from(count),
            }

            next_unit = idx + 1;
            components += 1;
        }

        if components == 0 {
            return Err(invalid());
        }

        Ok(range)
    }

    /// Shift `instant` by the range. Calendar months clamp to the last valid day.
    pub fn apply(&self, instant: DateTime<Utc>) -> ValidationResult<DateTime<Utc>> {
        let overflow = || ValidationError::InvalidRange { value: self.to_string() };

        let months = self.years.checked_mul(12).and_then(|m| m.checked_add(self.months)).ok_or_else(overflow)?;
        let shifted = if self.negative {
            instant.checked_sub_months(Months::new(months))
        } else {
            instant.checked_add_months(Months::new(months))
        }
        .ok_or_else(overflow)?;

        let mut offset = Duration::days(self.days)
            + Duration::hours(self.hours)
            + Duration::minutes(self.minutes)
            + Duration::seconds(self.seconds);
        if self.negative {
            offset = -offset;
        }

        shifted.checked_add_signed(offset).ok_or_else(overflow)
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = [
            (i64::from(self.years), "y"),
            (i64::from(self.months), "mo"),
            (self.days, "d"),
            (self.hours, "h"),
            (self.minutes, "m"),
            (self.seconds, "s"),
        ]
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, unit)| format!("{}{}", count, unit))
        .collect();

        let body = if parts.is_empty() { "0s".to_string() } else { parts.join(" ") };
        if self.negative {
            write!(f, "-{}", body)
        } else {
            write!(f, "{}", body)
        }
    }
}

/// Shift `instant` by the range described in `input`
pub fn apply(instant: DateTime<Utc>, input: &str) -> ValidationResult<DateTime<Utc>> {
    TimeRange::parse(input)?.apply(instant)
}

/// Render a duration in `d h m s` form, skipping zero components
pub fn from_duration(duration: Duration) -> String {
    let total = duration.num_seconds();
    let seconds = total.abs();

    let range = TimeRange {
        negative: total < 0,
        days: seconds / 86_400,
        hours: seconds % 86_400 / 3_600,
        minutes: seconds % 3_600 / 60,
        seconds: seconds % 60,
        ..TimeRange::default()
    };

    range.to_string()
}
