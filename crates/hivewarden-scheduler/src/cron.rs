//! Schedule parsing and due-time evaluation.
//!
//! Evaluation is pure: `(schedule, last-fired, now) -> due?` involves no
//! timers, which keeps the firing rules unit-testable and keeps the tick
//! loop trivially simple.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::error::{Result, ScheduleError};

/// A task's firing rule: a 5-field cron expression or a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(CronExpr),
    Every(Duration),
}

impl Schedule {
    /// Build a schedule from the task's stored fields. A cron expression
    /// wins when both are present.
    pub fn parse(cron_expr: Option<&str>, interval_seconds: Option<u64>) -> Result<Self> {
        if let Some(expr) = cron_expr {
            return Ok(Schedule::Cron(CronExpr::parse(expr)?));
        }
        match interval_seconds {
            Some(0) => Err(ScheduleError::Malformed("zero-second interval".into())),
            Some(secs) => Ok(Schedule::Every(Duration::seconds(secs as i64))),
            None => Err(ScheduleError::Missing),
        }
    }

    /// The first firing time strictly after `after`, if any exists within
    /// the search horizon.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(expr) => expr.next_occurrence(after),
            Schedule::Every(interval) => Some(after + *interval),
        }
    }

    /// Whether the task should fire now. `anchor` is the reference point
    /// for a task that has never fired (its creation time); tracking
    /// last-fired instead of counting ticks is what makes firing
    /// at-most-once per due occurrence.
    pub fn is_due(
        &self,
        last_fired: Option<DateTime<Utc>>,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let after = last_fired.unwrap_or(anchor);
        match self.next_occurrence(after) {
            Some(next) => next <= now,
            None => false,
        }
    }
}

/// A parsed 5-field cron expression (minute hour day-of-month month
/// day-of-week), matched in UTC. Day-of-month and day-of-week combine the
/// usual way: when both are restricted, either may match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days: u32,
    months: u16,
    weekdays: u8,
    day_restricted: bool,
    weekday_restricted: bool,
}

/// Search horizon for the next occurrence. Anything that cannot fire
/// within four years (for example `0 0 30 2 *`) is treated as never due.
const SEARCH_HORIZON_DAYS: i64 = 4 * 366;

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::Malformed(format!(
                "expected 5 fields, got {} in {expr:?}",
                fields.len()
            )));
        }
        Ok(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)? as u32,
            days: parse_field(fields[2], 1, 31)? as u32,
            months: parse_field(fields[3], 1, 12)? as u16,
            weekdays: fold_sunday(parse_field(fields[4], 0, 7)?),
            day_restricted: fields[2] != "*",
            weekday_restricted: fields[4] != "*",
        })
    }

    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);
        let horizon = after + Duration::days(SEARCH_HORIZON_DAYS);

        while t <= horizon {
            if !bit_set(self.months as u64, t.month()) {
                t = start_of_next_month(&t)?;
                continue;
            }
            if !self.day_matches(&t) {
                t = truncate_to_minute(t + Duration::days(1))?
                    .with_hour(0)?
                    .with_minute(0)?;
                continue;
            }
            if !bit_set(self.hours as u64, t.hour()) {
                t = (t + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if !bit_set(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = bit_set(self.days as u64, t.day());
        let dow = bit_set(
            self.weekdays as u64,
            t.weekday().num_days_from_sunday(),
        );
        match (self.day_restricted, self.weekday_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

/// Parse one cron field into a bitmask over `[min, max]`.
fn parse_field(field: &str, min: u32, max: u32) -> Result<u64> {
    if field.is_empty() {
        return Err(ScheduleError::Malformed("empty field".into()));
    }
    let mut mask: u64 = 0;
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((range, step_str)) => {
                let step: u32 = step_str
                    .parse()
                    .map_err(|_| ScheduleError::Malformed(format!("bad step in {part:?}")))?;
                if step == 0 {
                    return Err(ScheduleError::Malformed(format!("zero step in {part:?}")));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (parse_value(a, min, max)?, parse_value(b, min, max)?)
        } else {
            let value = parse_value(range_part, min, max)?;
            // `n/step` means "from n to the end" only when a step is given.
            if step > 1 {
                (value, max)
            } else {
                (value, value)
            }
        };

        if start > end {
            return Err(ScheduleError::Malformed(format!(
                "inverted range in {part:?}"
            )));
        }
        let mut value = start;
        while value <= end {
            mask |= 1 << value;
            value += step;
        }
    }
    Ok(mask)
}

fn parse_value(raw: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = raw
        .parse()
        .map_err(|_| ScheduleError::Malformed(format!("bad value {raw:?}")))?;
    if value < min || value > max {
        return Err(ScheduleError::Malformed(format!(
            "value {value} outside {min}-{max}"
        )));
    }
    Ok(value)
}

/// Both 0 and 7 mean Sunday in the day-of-week field.
fn fold_sunday(mask: u64) -> u8 {
    let mut mask = mask;
    if mask & (1 << 7) != 0 {
        mask = (mask & !(1 << 7)) | 1;
    }
    mask as u8
}

fn bit_set(mask: u64, bit: u32) -> bool {
    mask & (1 << bit) != 0
}

fn truncate_to_minute(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_second(0)?.with_nanosecond(0)
}

fn start_of_next_month(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn next(expr: &str, after: &str) -> Option<String> {
        CronExpr::parse(expr)
            .unwrap()
            .next_occurrence(at(after))
            .map(|t| t.to_rfc3339())
    }

    #[test]
    fn every_five_minutes() {
        assert_eq!(
            next("*/5 * * * *", "2026-03-01T10:02:17Z").as_deref(),
            Some("2026-03-01T10:05:00+00:00")
        );
        // Exactly on a boundary advances to the next one.
        assert_eq!(
            next("*/5 * * * *", "2026-03-01T10:05:00Z").as_deref(),
            Some("2026-03-01T10:10:00+00:00")
        );
    }

    #[test]
    fn daily_at_three() {
        assert_eq!(
            next("0 3 * * *", "2026-03-01T04:00:00Z").as_deref(),
            Some("2026-03-02T03:00:00+00:00")
        );
    }

    #[test]
    fn monthly_rollover() {
        assert_eq!(
            next("30 4 1 * *", "2026-01-15T00:00:00Z").as_deref(),
            Some("2026-02-01T04:30:00+00:00")
        );
    }

    #[test]
    fn year_rollover() {
        assert_eq!(
            next("0 0 1 1 *", "2026-03-01T00:00:00Z").as_deref(),
            Some("2027-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn weekday_only() {
        // 2026-03-01 is a Sunday.
        assert_eq!(
            next("0 9 * * 1", "2026-03-01T00:00:00Z").as_deref(),
            Some("2026-03-02T09:00:00+00:00")
        );
        // 7 is also Sunday.
        assert_eq!(
            next("0 9 * * 7", "2026-03-01T00:00:00Z").as_deref(),
            Some("2026-03-01T09:00:00+00:00")
        );
    }

    #[test]
    fn dom_and_dow_combine_with_or() {
        // Day 15 OR Monday, whichever comes first after Sun Mar 1.
        assert_eq!(
            next("0 0 15 * 1", "2026-03-01T00:00:00Z").as_deref(),
            Some("2026-03-02T00:00:00+00:00")
        );
    }

    #[test]
    fn lists_and_ranges() {
        assert_eq!(
            next("0 8-10,14 * * *", "2026-03-01T09:30:00Z").as_deref(),
            Some("2026-03-01T10:00:00+00:00")
        );
        assert_eq!(
            next("0 8-10,14 * * *", "2026-03-01T11:00:00Z").as_deref(),
            Some("2026-03-01T14:00:00+00:00")
        );
    }

    #[test]
    fn impossible_date_is_never_due() {
        assert_eq!(next("0 0 30 2 *", "2026-01-01T00:00:00Z"), None);
    }

    #[test]
    fn malformed_expressions_rejected() {
        for expr in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "a * * * *",
            "1-0 * * * *",
            "*/0 * * * *",
        ] {
            assert!(CronExpr::parse(expr).is_err(), "expected rejection: {expr:?}");
        }
    }

    #[test]
    fn schedule_prefers_cron_over_interval() {
        let schedule = Schedule::parse(Some("0 * * * *"), Some(60)).unwrap();
        assert!(matches!(schedule, Schedule::Cron(_)));
    }

    #[test]
    fn schedule_without_either_is_missing() {
        assert!(matches!(
            Schedule::parse(None, None),
            Err(ScheduleError::Missing)
        ));
        assert!(Schedule::parse(None, Some(0)).is_err());
    }

    #[test]
    fn interval_due_tracking() {
        let schedule = Schedule::parse(None, Some(30)).unwrap();
        let created = at("2026-03-01T10:00:00Z");

        // Never fired: due once the interval has elapsed since creation.
        assert!(!schedule.is_due(None, created, at("2026-03-01T10:00:29Z")));
        assert!(schedule.is_due(None, created, at("2026-03-01T10:00:30Z")));

        // After firing, not due again until another interval passes.
        let fired = at("2026-03-01T10:00:30Z");
        assert!(!schedule.is_due(Some(fired), created, at("2026-03-01T10:00:59Z")));
        assert!(schedule.is_due(Some(fired), created, at("2026-03-01T10:01:00Z")));
    }

    #[test]
    fn at_most_once_per_occurrence_under_fast_ticks() {
        // A 30-second task polled every second fires exactly once per
        // 30-second occurrence.
        let schedule = Schedule::parse(None, Some(30)).unwrap();
        let created = at("2026-03-01T10:00:00Z");
        let mut last_fired: Option<DateTime<Utc>> = None;
        let mut fires = 0;

        for second in 0..29 {
            let now = created + Duration::seconds(30 + second);
            if schedule.is_due(last_fired, created, now) {
                fires += 1;
                last_fired = Some(now);
            }
        }
        assert_eq!(fires, 1);
    }

    #[test]
    fn cron_catches_up_single_fire_after_gap() {
        // Ticks were suspended across several due occurrences; the next
        // tick fires once, not once per missed occurrence.
        let schedule = Schedule::parse(Some("*/5 * * * *"), None).unwrap();
        let last = at("2026-03-01T10:00:00Z");
        let now = at("2026-03-01T11:00:00Z");
        assert!(schedule.is_due(Some(last), last, now));
        // Firing updates last-fired to now; the next occurrence is in the
        // future again.
        assert!(!schedule.is_due(Some(now), last, now));
    }
}
