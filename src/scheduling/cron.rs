//! Cron expression parsing and evaluation for sweep schedules.
//!
//! Standard 5-field expressions: minute, hour, day of month, month, day of
//! week (0 = Sunday). Supports `*`, single values, ranges (`1-5`), lists
//! (`1,15,30`), and steps (`*/6`, `10-50/10`).

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing a cron expression.
#[derive(Debug, Error)]
pub enum ScheduleParseError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("field '{0}' is not a valid cron field")]
    BadField(String),
    #[error("value {value} is outside [{min}, {max}]")]
    OutOfRange { value: u32, min: u32, max: u32 },
    #[error("range {0}-{1} is inverted")]
    InvertedRange(u32, u32),
    #[error("step value '{0}' is invalid")]
    BadStep(String),
}

/// The admitted values of one cron field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FieldSet {
    values: BTreeSet<u32>,
}

impl FieldSet {
    fn parse(expr: &str, min: u32, max: u32) -> Result<Self, ScheduleParseError> {
        let mut values = BTreeSet::new();

        for part in expr.split(',') {
            let part = part.trim();

            let (range, step) = match part.split_once('/') {
                Some((range, step_str)) => {
                    let step: u32 = step_str
                        .parse()
                        .map_err(|_| ScheduleParseError::BadStep(step_str.to_string()))?;
                    if step == 0 {
                        return Err(ScheduleParseError::BadStep(step_str.to_string()));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((lo, hi)) = range.split_once('-') {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| ScheduleParseError::BadField(range.to_string()))?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| ScheduleParseError::BadField(range.to_string()))?;
                if lo > hi {
                    return Err(ScheduleParseError::InvertedRange(lo, hi));
                }
                (lo, hi)
            } else {
                let value: u32 = range
                    .parse()
                    .map_err(|_| ScheduleParseError::BadField(range.to_string()))?;
                (value, value)
            };

            if start < min || end > max {
                return Err(ScheduleParseError::OutOfRange {
                    value: if start < min { start } else { end },
                    min,
                    max,
                });
            }

            values.extend((start..=end).step_by(step as usize));
        }

        Ok(Self { values })
    }

    fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// The original expression.
    pub expr: String,
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl Schedule {
    /// Parse a 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleParseError::FieldCount(fields.len()));
        }

        Ok(Self {
            expr: expr.to_string(),
            minute: FieldSet::parse(fields[0], 0, 59)?,
            hour: FieldSet::parse(fields[1], 0, 23)?,
            day_of_month: FieldSet::parse(fields[2], 1, 31)?,
            month: FieldSet::parse(fields[3], 1, 12)?,
            day_of_week: FieldSet::parse(fields[4], 0, 6)?,
        })
    }

    /// Whether the schedule fires at `at` (second precision is ignored).
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        self.minute.contains(at.minute())
            && self.hour.contains(at.hour())
            && self.day_of_month.contains(at.day())
            && self.month.contains(at.month())
            && self.day_of_week.contains(at.weekday().num_days_from_sunday())
    }

    /// The next fire time strictly after `after`. Scans minute by minute;
    /// bounded at four years, which covers leap-day-only expressions.
    pub fn next_run(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (*after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        let limit = *after + Duration::days(366 * 4);
        while candidate <= limit {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }

        None
    }
}

impl FromStr for Schedule {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

/// Stock schedules for the three sweeps.
pub mod presets {
    use super::Schedule;

    /// Daily backup sweep at 02:00.
    pub fn daily_backup() -> Schedule {
        Schedule::parse("0 2 * * *").expect("preset parses")
    }

    /// Daily deletion sweep at 03:00, an hour after the backup sweep.
    pub fn daily_deletion() -> Schedule {
        Schedule::parse("0 3 * * *").expect("preset parses")
    }

    /// Weekly integrity sweep, Sunday 04:00.
    pub fn weekly_integrity() -> Schedule {
        Schedule::parse("0 4 * * 0").expect("preset parses")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_wildcards() {
        let schedule = Schedule::parse("* * * * *").unwrap();
        let any = Utc.with_ymd_and_hms(2024, 3, 14, 9, 26, 0).unwrap();
        assert!(schedule.matches(&any));
    }

    #[test]
    fn test_parse_fixed_time() {
        let schedule = Schedule::parse("0 2 * * *").unwrap();
        assert!(schedule.matches(&Utc.with_ymd_and_hms(2024, 3, 14, 2, 0, 0).unwrap()));
        assert!(!schedule.matches(&Utc.with_ymd_and_hms(2024, 3, 14, 2, 1, 0).unwrap()));
        assert!(!schedule.matches(&Utc.with_ymd_and_hms(2024, 3, 14, 3, 0, 0).unwrap()));
    }

    #[test]
    fn test_parse_ranges_lists_steps() {
        let schedule = Schedule::parse("0,30 9-17 * * 1-5").unwrap();
        assert!(schedule.matches(&Utc.with_ymd_and_hms(2024, 3, 13, 9, 30, 0).unwrap())); // Wednesday
        assert!(!schedule.matches(&Utc.with_ymd_and_hms(2024, 3, 16, 9, 30, 0).unwrap())); // Saturday

        let stepped = Schedule::parse("*/15 * * * *").unwrap();
        assert!(stepped.matches(&Utc.with_ymd_and_hms(2024, 3, 13, 9, 45, 0).unwrap()));
        assert!(!stepped.matches(&Utc.with_ymd_and_hms(2024, 3, 13, 9, 50, 0).unwrap()));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Schedule::parse("* *").is_err());
        assert!(Schedule::parse("60 * * * *").is_err());
        assert!(Schedule::parse("* 25 * * *").is_err());
        assert!(Schedule::parse("30-10 * * * *").is_err());
        assert!(Schedule::parse("*/0 * * * *").is_err());
        assert!(Schedule::parse("x * * * *").is_err());
    }

    #[test]
    fn test_next_run_same_day() {
        let schedule = Schedule::parse("0 2 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 14, 1, 30, 0).unwrap();
        let next = schedule.next_run(&after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 14, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_rolls_to_next_day() {
        let schedule = Schedule::parse("0 2 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 14, 2, 0, 0).unwrap();
        let next = schedule.next_run(&after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 15, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_weekly() {
        let schedule = presets::weekly_integrity();
        // 2024-03-14 is a Thursday; next Sunday is the 17th.
        let after = Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap();
        let next = schedule.next_run(&after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 17, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_presets_order_backup_before_deletion() {
        let after = Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap();
        let backup = presets::daily_backup().next_run(&after).unwrap();
        let deletion = presets::daily_deletion().next_run(&after).unwrap();
        assert!(backup < deletion);
    }
}
