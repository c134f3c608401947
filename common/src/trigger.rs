use std::fmt;

use chrono::{
    DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Utc,
};
use chrono_tz::Tz;

use crate::time::{DayOfWeek, TimeOfDay};

/// When a planned job fires. Wall-clock variants are evaluated in the
/// configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Weekly { day: DayOfWeek, time: TimeOfDay },
    Daily { time: TimeOfDay },
    EveryMinute,
    At(DateTime<Utc>),
    Immediate,
}

impl Trigger {
    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Weekly { .. } | Self::Daily { .. } | Self::EveryMinute)
    }

    /// First fire instant once armed at `now`. One-shot triggers that are
    /// already due fire at `now`.
    pub fn first_fire(&self, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::At(at) => Some(at.max(now)),
            Self::Immediate => Some(now),
            _ => self.next_fire(tz, now),
        }
    }

    /// Next fire instant strictly after `after`; `None` for one-shot triggers.
    pub fn next_fire(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::Weekly { day, time } => next_local(tz, after, time, Some(day)),
            Self::Daily { time } => next_local(tz, after, time, None),
            Self::EveryMinute => {
                let next_minute = (after.timestamp().div_euclid(60) + 1) * 60;
                Utc.timestamp_opt(next_minute, 0).single()
            }
            Self::At(_) | Self::Immediate => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weekly { day, time } => write!(f, "weekly {day} {time}"),
            Self::Daily { time } => write!(f, "daily {time}"),
            Self::EveryMinute => f.write_str("every minute"),
            Self::At(at) => write!(f, "at {}", at.to_rfc3339()),
            Self::Immediate => f.write_str("immediately"),
        }
    }
}

fn naive_time(time: TimeOfDay) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(NaiveTime::MIN)
}

/// Maps a local wall-clock time to an instant. Times skipped by a
/// spring-forward transition move one hour later; repeated times take the
/// earlier instant.
pub fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

fn local_on(tz: Tz, date: NaiveDate, time: TimeOfDay) -> Option<DateTime<Utc>> {
    resolve_local(tz, date.and_time(naive_time(time)))
}

fn next_local(
    tz: Tz,
    after: DateTime<Utc>,
    time: TimeOfDay,
    weekday: Option<DayOfWeek>,
) -> Option<DateTime<Utc>> {
    let start = after.with_timezone(&tz).date_naive();
    (0..=7)
        .filter_map(|offset| start.checked_add_days(Days::new(offset)))
        .filter(|date| weekday.map_or(true, |day| date.weekday() == day.to_chrono()))
        .filter_map(|date| local_on(tz, date, time))
        .find(|instant| *instant > after)
}

/// Next occurrence of `time` in `tz` counted from today's local date. A time
/// already passed today moves to tomorrow; a time equal to `now` stays.
pub fn next_alarm_instant(tz: Tz, now: DateTime<Utc>, time: TimeOfDay) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&tz).date_naive();
    match local_on(tz, today, time) {
        Some(instant) if instant >= now => Some(instant),
        _ => today
            .checked_add_days(Days::new(1))
            .and_then(|tomorrow| local_on(tz, tomorrow, time)),
    }
}

/// Local weekday of `now` in `tz`.
pub fn local_weekday(tz: Tz, now: DateTime<Utc>) -> DayOfWeek {
    DayOfWeek::from_chrono(now.with_timezone(&tz).weekday())
}
