//! Monitor schedules and next-occurrence computation.
//!
//! Two schedule flavors exist on the wire: five-field crontab expressions
//! and `[value, unit]` intervals. All arithmetic is UTC.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("crontab expression must have 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid crontab field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("interval value must be at least 1")]
    ZeroInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Crontab(CronSchedule),
    Interval(u32, IntervalUnit),
}

impl Schedule {
    pub fn interval(value: u32, unit: IntervalUnit) -> Result<Self, ScheduleParseError> {
        if value == 0 {
            return Err(ScheduleParseError::ZeroInterval);
        }
        Ok(Schedule::Interval(value, unit))
    }

    /// The first scheduled occurrence strictly after `after`.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Crontab(cron) => cron.next_after(after),
            Schedule::Interval(value, unit) => match unit {
                IntervalUnit::Minute => Some(after + Duration::minutes(i64::from(*value))),
                IntervalUnit::Hour => Some(after + Duration::hours(i64::from(*value))),
                IntervalUnit::Day => Some(after + Duration::days(i64::from(*value))),
                IntervalUnit::Week => Some(after + Duration::weeks(i64::from(*value))),
                IntervalUnit::Month => after.checked_add_months(Months::new(*value)),
                IntervalUnit::Year => after.checked_add_months(Months::new(value.checked_mul(12)?)),
            },
        }
    }
}

/// A parsed five-field crontab expression (minute, hour, day-of-month,
/// month, day-of-week; day-of-week 0 and 7 are both Sunday).
#[derive(Clone)]
pub struct CronSchedule {
    minutes: [bool; 60],
    hours: [bool; 24],
    days_of_month: [bool; 32],
    months: [bool; 13],
    days_of_week: [bool; 7],
    dom_restricted: bool,
    dow_restricted: bool,
    source: String,
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSchedule").field("source", &self.source).finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleParseError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleParseError::FieldCount(fields.len()));
        }

        let minutes = parse_field::<60>(fields[0], 0)?;
        let hours = parse_field::<24>(fields[1], 0)?;
        let days_of_month = parse_field::<32>(fields[2], 1)?;
        let months = parse_field::<13>(fields[3], 1)?;
        // 7 is accepted as an alias for Sunday.
        let dow_raw = parse_field::<8>(fields[4], 0)?;
        let mut days_of_week = [false; 7];
        for (day, set) in dow_raw.iter().enumerate() {
            if *set {
                days_of_week[day % 7] = true;
            }
        }

        Ok(CronSchedule {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
            source: fields.join(" "),
        })
    }
}

impl CronSchedule {
    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months[date.month() as usize] {
            return false;
        }
        let dom = self.days_of_month[date.day() as usize];
        let dow = self.days_of_week[date.weekday().num_days_from_sunday() as usize];
        // Vixie cron: when both day fields are restricted, either may match.
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Walks the calendar for the first firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let start_date = start.date_naive();
        let mut date = start_date;

        // Four years bounds even the rarest date/weekday combinations.
        for _ in 0..=(366 * 4) {
            if self.day_matches(date) {
                let first_hour = if date == start_date { start.hour() } else { 0 };
                for hour in first_hour..24 {
                    if !self.hours[hour as usize] {
                        continue;
                    }
                    let first_minute = if date == start_date && hour == start.hour() {
                        start.minute()
                    } else {
                        0
                    };
                    for minute in first_minute..60 {
                        if self.minutes[minute as usize] {
                            let naive = date.and_hms_opt(hour, minute, 0)?;
                            return Some(Utc.from_utc_datetime(&naive));
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// Parses one crontab field into a membership table of size `N`, where
/// valid values are `low..N`. Supports `*`, steps, ranges, and lists.
fn parse_field<const N: usize>(field: &str, low: usize) -> Result<[bool; N], ScheduleParseError> {
    let invalid = |reason: &str| ScheduleParseError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let mut table = [false; N];
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step.parse().map_err(|_| invalid("step is not a number"))?;
                if step == 0 {
                    return Err(invalid("step must be at least 1"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (from, to) = if range == "*" {
            (low, N - 1)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: usize = a.parse().map_err(|_| invalid("range start is not a number"))?;
            let b: usize = b.parse().map_err(|_| invalid("range end is not a number"))?;
            (a, b)
        } else {
            let v: usize = range.parse().map_err(|_| invalid("value is not a number"))?;
            // A bare value with a step ("3/5") behaves like "3-max/5".
            if step > 1 { (v, N - 1) } else { (v, v) }
        };

        if from < low || to >= N || from > to {
            return Err(invalid("value out of range"));
        }
        for v in (from..=to).step_by(step) {
            table[v] = true;
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_interval_next_occurrence() {
        let schedule = Schedule::interval(2, IntervalUnit::Hour).unwrap();
        assert_eq!(
            schedule.next_occurrence(dt("2024-03-01T10:30:00Z")),
            Some(dt("2024-03-01T12:30:00Z"))
        );

        let schedule = Schedule::interval(1, IntervalUnit::Month).unwrap();
        assert_eq!(
            schedule.next_occurrence(dt("2024-01-31T00:00:00Z")),
            Some(dt("2024-02-29T00:00:00Z"))
        );
    }

    #[test]
    fn test_interval_rejects_zero() {
        assert_eq!(
            Schedule::interval(0, IntervalUnit::Minute),
            Err(ScheduleParseError::ZeroInterval)
        );
    }

    #[test]
    fn test_cron_every_minute() {
        let cron: CronSchedule = "* * * * *".parse().unwrap();
        assert_eq!(
            cron.next_after(dt("2024-03-01T10:30:12Z")),
            Some(dt("2024-03-01T10:31:00Z"))
        );
    }

    #[test]
    fn test_cron_hourly_on_the_hour() {
        let cron: CronSchedule = "0 * * * *".parse().unwrap();
        assert_eq!(
            cron.next_after(dt("2024-03-01T10:00:00Z")),
            Some(dt("2024-03-01T11:00:00Z"))
        );
        assert_eq!(
            cron.next_after(dt("2024-03-01T10:59:30Z")),
            Some(dt("2024-03-01T11:00:00Z"))
        );
    }

    #[test]
    fn test_cron_step_and_range() {
        let cron: CronSchedule = "*/15 9-17 * * *".parse().unwrap();
        assert_eq!(
            cron.next_after(dt("2024-03-01T08:50:00Z")),
            Some(dt("2024-03-01T09:00:00Z"))
        );
        assert_eq!(
            cron.next_after(dt("2024-03-01T17:46:00Z")),
            Some(dt("2024-03-02T09:00:00Z"))
        );
    }

    #[test]
    fn test_cron_day_of_week() {
        // Fridays at midnight; 2024-03-01 is a Friday.
        let cron: CronSchedule = "0 0 * * 5".parse().unwrap();
        assert_eq!(
            cron.next_after(dt("2024-03-01T00:00:00Z")),
            Some(dt("2024-03-08T00:00:00Z"))
        );
    }

    #[test]
    fn test_cron_sunday_alias() {
        let seven: CronSchedule = "0 0 * * 7".parse().unwrap();
        let zero: CronSchedule = "0 0 * * 0".parse().unwrap();
        let after = dt("2024-03-01T00:00:00Z");
        assert_eq!(seven.next_after(after), zero.next_after(after));
        // 2024-03-03 is a Sunday.
        assert_eq!(seven.next_after(after), Some(dt("2024-03-03T00:00:00Z")));
    }

    #[test]
    fn test_cron_dom_dow_union() {
        // Both restricted: the 15th OR a Monday, whichever comes first.
        let cron: CronSchedule = "0 0 15 * 1".parse().unwrap();
        // 2024-03-04 is the first Monday after the 1st, before the 15th.
        assert_eq!(
            cron.next_after(dt("2024-03-01T00:00:00Z")),
            Some(dt("2024-03-04T00:00:00Z"))
        );
    }

    #[test]
    fn test_cron_monthly() {
        let cron: CronSchedule = "30 6 1 * *".parse().unwrap();
        assert_eq!(
            cron.next_after(dt("2024-03-01T06:30:00Z")),
            Some(dt("2024-04-01T06:30:00Z"))
        );
    }

    #[test]
    fn test_cron_parse_errors() {
        assert!(matches!(
            "* * * *".parse::<CronSchedule>(),
            Err(ScheduleParseError::FieldCount(4))
        ));
        assert!("60 * * * *".parse::<CronSchedule>().is_err());
        assert!("* 24 * * *".parse::<CronSchedule>().is_err());
        assert!("* * 0 * *".parse::<CronSchedule>().is_err());
        assert!("* * * 13 *".parse::<CronSchedule>().is_err());
        assert!("* * * * 8".parse::<CronSchedule>().is_err());
        assert!("*/0 * * * *".parse::<CronSchedule>().is_err());
        assert!("5-2 * * * *".parse::<CronSchedule>().is_err());
        assert!("a * * * *".parse::<CronSchedule>().is_err());
    }
}
