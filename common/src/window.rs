use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::{
    error::TimeError,
    schedule::{DailySchedule, PowerSchedule},
    time::{parse_time_to_minutes, MINUTES_PER_DAY},
};

/// Half-open `[on, off)` containment. When `on >= off` the window wraps
/// past midnight.
pub fn is_window_active(on: u16, off: u16, current: u16) -> bool {
    if on < off {
        on <= current && current < off
    } else {
        current >= on || current < off
    }
}

/// Wall-clock minutes since midnight of `now` in `tz`, UTC when `None`.
pub fn local_minutes(now: DateTime<Utc>, tz: Option<Tz>) -> u16 {
    let (hour, minute) = match tz {
        Some(tz) => {
            let local = now.with_timezone(&tz);
            (local.hour(), local.minute())
        }
        None => (now.hour(), now.minute()),
    };
    (hour * 60 + minute) as u16
}

pub fn is_power_window_active(power: &PowerSchedule, current: u16) -> Result<bool, TimeError> {
    let on = parse_time_to_minutes(&power.on)?;
    let off = parse_time_to_minutes(&power.off)?;
    Ok(is_window_active(on, off, current))
}

pub fn is_running_at(schedule: Option<&DailySchedule>, current: u16) -> Result<bool, TimeError> {
    match schedule {
        Some(schedule) if schedule.power.enabled => is_power_window_active(&schedule.power, current),
        _ => Ok(false),
    }
}

pub fn is_currently_running(
    schedule: Option<&DailySchedule>,
    tz: Option<Tz>,
    now: DateTime<Utc>,
) -> Result<bool, TimeError> {
    is_running_at(schedule, local_minutes(now, tz))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStartInfo {
    pub minutes_until_start: u16,
    pub start_time: String,
    pub is_today: bool,
}

pub fn time_until_start_at(
    schedule: Option<&DailySchedule>,
    current: u16,
) -> Result<Option<ScheduleStartInfo>, TimeError> {
    let Some(schedule) = schedule.filter(|s| s.power.enabled) else {
        return Ok(None);
    };
    let on = parse_time_to_minutes(&schedule.power.on)?;

    let (minutes_until_start, is_today) = if on > current {
        (on - current, true)
    } else {
        (MINUTES_PER_DAY - current + on, false)
    };

    Ok(Some(ScheduleStartInfo {
        minutes_until_start,
        start_time: schedule.power.on.clone(),
        is_today,
    }))
}

pub fn time_until_start(
    schedule: Option<&DailySchedule>,
    tz: Option<Tz>,
    now: DateTime<Utc>,
) -> Result<Option<ScheduleStartInfo>, TimeError> {
    time_until_start_at(schedule, local_minutes(now, tz))
}

pub fn format_countdown(minutes: u32) -> String {
    fn unit(n: u32, singular: &str) -> String {
        if n == 1 {
            format!("{n} {singular}")
        } else {
            format!("{n} {singular}s")
        }
    }

    if minutes < 60 {
        return unit(minutes, "minute");
    }
    let hours = minutes / 60;
    let rest = minutes % 60;
    if rest == 0 {
        unit(hours, "hour")
    } else {
        format!("{} {}", unit(hours, "hour"), unit(rest, "minute"))
    }
}
