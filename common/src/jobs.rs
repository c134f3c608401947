use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::{
    config::{LedNightMode, Settings},
    error::{PlanError, TimeError},
    schedule::{AlarmSchedule, BasePosition, DailySchedule, Schedules},
    time::{day_for_schedule, parse_time_to_minutes, DayOfWeek, TimeOfDay},
    trigger::{local_weekday, Trigger},
    types::{Component, DeviceStatusUpdate, Side, SideStatusUpdate},
    window::{is_running_at, is_window_active, local_minutes},
};

#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    PowerOn { side: Side, temperature_f: i32 },
    PowerOff { side: Side },
    SetTemperature { side: Side, temperature_f: i32 },
    SetBasePosition { side: Side, position: BasePosition },
    /// Sends the alarm with its next absolute trigger time, computed when the job fires.
    ArmAlarm { side: Side, alarm: AlarmSchedule },
    LedNightMode(LedNightMode),
    Prime,
    AwayResume { side: Side },
}

impl JobAction {
    pub fn component(&self) -> Component {
        match self {
            Self::PowerOn { .. } | Self::PowerOff { .. } => Component::PowerSchedule,
            Self::SetTemperature { .. } => Component::TemperatureSchedule,
            Self::SetBasePosition { .. } => Component::ElevationSchedule,
            Self::ArmAlarm { .. } => Component::AlarmSchedule,
            Self::LedNightMode(_) => Component::LedNightMode,
            Self::Prime => Component::PrimeSchedule,
            Self::AwayResume { .. } => Component::Jobs,
        }
    }

    /// Device status change for actions that need nothing but the plan.
    pub fn status_update(&self) -> Option<DeviceStatusUpdate> {
        match *self {
            Self::PowerOn {
                side,
                temperature_f,
            } => Some(DeviceStatusUpdate::for_side(
                side,
                SideStatusUpdate::power_on(temperature_f),
            )),
            Self::PowerOff { side } => Some(DeviceStatusUpdate::for_side(
                side,
                SideStatusUpdate::power_off(),
            )),
            Self::SetTemperature {
                side,
                temperature_f,
            } => Some(DeviceStatusUpdate::for_side(
                side,
                SideStatusUpdate::target(temperature_f),
            )),
            Self::Prime => Some(DeviceStatusUpdate::priming()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub id: String,
    pub trigger: Trigger,
    pub action: JobAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTimezone,
    AwayMode,
    Disabled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoTimezone => "time zone not set",
            Self::AwayMode => "side is in away mode",
            Self::Disabled => "disabled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub scope: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Power on sides whose window is already open.
    pub reconcile: bool,
}

/// Jobs derived from one snapshot of settings and schedules, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct JobPlan {
    pub timezone: Option<Tz>,
    pub jobs: BTreeMap<String, JobSpec>,
    pub skipped: Vec<Skip>,
    pub errors: Vec<PlanError>,
}

impl JobPlan {
    fn add(&mut self, id: String, trigger: Trigger, action: JobAction) {
        self.jobs.insert(
            id.clone(),
            JobSpec {
                id,
                trigger,
                action,
            },
        );
    }

    fn skip(&mut self, scope: impl Into<String>, reason: SkipReason) {
        self.skipped.push(Skip {
            scope: scope.into(),
            reason,
        });
    }

    /// Parses `raw` for job `id`, recording the failure instead of aborting.
    fn time(&mut self, id: &str, raw: &str) -> Option<TimeOfDay> {
        match raw.parse::<TimeOfDay>() {
            Ok(time) => Some(time),
            Err(source) => {
                self.errors.push(PlanError::InvalidTime {
                    job: id.to_string(),
                    source,
                });
                None
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }
}

/// Derives every job for the current settings and schedules.
///
/// Gating never fails the pass: a missing zone, an away side or a disabled
/// feature only produces skips, and a bad time drops the single job it
/// belongs to.
pub fn plan_jobs(
    settings: &Settings,
    schedules: &Schedules,
    now: DateTime<Utc>,
    options: PlanOptions,
) -> JobPlan {
    let mut plan = JobPlan::default();

    plan_away_resumes(&mut plan, settings);

    let timezone = match settings.time_zone.as_deref() {
        None => None,
        Some(name) => match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                plan.errors.push(PlanError::UnknownTimezone(name.to_string()));
                None
            }
        },
    };
    let Some(tz) = timezone else {
        plan.skip("schedules", SkipReason::NoTimezone);
        return plan;
    };
    plan.timezone = Some(tz);

    for side in Side::ALL {
        if settings.is_away(side) {
            plan.skip(side.as_str(), SkipReason::AwayMode);
            continue;
        }
        for (day, schedule) in schedules.side(side).days() {
            plan_day(&mut plan, tz, now, side, day, schedule);
        }
        if options.reconcile {
            plan_reconcile(&mut plan, tz, now, side, schedules);
        }
    }

    plan_priming(&mut plan, settings);
    plan_led_night_mode(&mut plan, settings);
    plan
}

fn plan_day(
    plan: &mut JobPlan,
    tz: Tz,
    now: DateTime<Utc>,
    side: Side,
    day: DayOfWeek,
    schedule: &DailySchedule,
) {
    let power = &schedule.power;
    if !power.enabled {
        plan.skip(format!("{side}-{day}"), SkipReason::Disabled);
        return;
    }

    let id = format!("{side}-{day}-{}-power-on", power.on);
    if let Some(time) = plan.time(&id, &power.on) {
        plan.add(
            id,
            Trigger::Weekly { day, time },
            JobAction::PowerOn {
                side,
                temperature_f: power.on_temperature,
            },
        );
    }

    let id = format!("{side}-{day}-{}-power-off", power.off);
    if let Some(time) = plan.time(&id, &power.off) {
        plan.add(
            id,
            Trigger::Weekly {
                day: day_for_schedule(day, time),
                time,
            },
            JobAction::PowerOff { side },
        );
    }

    for (raw, temperature_f) in &schedule.temperatures {
        let id = format!("{side}-{day}-{raw}-{temperature_f}-temperature-adjustment");
        if let Some(time) = plan.time(&id, raw) {
            plan.add(
                id,
                Trigger::Weekly {
                    day: day_for_schedule(day, time),
                    time,
                },
                JobAction::SetTemperature {
                    side,
                    temperature_f: *temperature_f,
                },
            );
        }
    }

    for (raw, elevation) in &schedule.elevations {
        let id = format!("{side}-{day}-{raw}-base-elevation");
        if let Some(time) = plan.time(&id, raw) {
            plan.add(
                id,
                Trigger::Weekly {
                    day: day_for_schedule(day, time),
                    time,
                },
                JobAction::SetBasePosition {
                    side,
                    position: elevation.resolve(),
                },
            );
        }
    }

    plan_alarm(plan, tz, now, side, day, &schedule.alarm);
}

fn plan_alarm(
    plan: &mut JobPlan,
    tz: Tz,
    now: DateTime<Utc>,
    side: Side,
    day: DayOfWeek,
    alarm: &AlarmSchedule,
) {
    let id = format!("{side}-{day}-alarm");
    if !alarm.enabled {
        plan.skip(id, SkipReason::Disabled);
        return;
    }
    if plan.time(&id, &alarm.time).is_none() {
        return;
    }

    let action = JobAction::ArmAlarm {
        side,
        alarm: alarm.clone(),
    };
    if local_weekday(tz, now) == day {
        plan.add(format!("{id}-now"), Trigger::Immediate, action.clone());
    }
    plan.add(
        id,
        Trigger::Weekly {
            day,
            time: TimeOfDay::MIDNIGHT,
        },
        action,
    );
}

fn plan_reconcile(plan: &mut JobPlan, tz: Tz, now: DateTime<Utc>, side: Side, schedules: &Schedules) {
    let today = local_weekday(tz, now);
    let schedule = schedules.schedule_for_day(side, today);
    let id = format!("{side}-power-reconcile");

    match is_running_at(Some(schedule), local_minutes(now, Some(tz))) {
        Ok(true) => plan.add(
            id,
            Trigger::Immediate,
            JobAction::PowerOn {
                side,
                temperature_f: schedule.power.on_temperature,
            },
        ),
        Ok(false) => {}
        Err(source) => plan.errors.push(PlanError::InvalidTime { job: id, source }),
    }
}

fn plan_priming(plan: &mut JobPlan, settings: &Settings) {
    let prime = &settings.prime_pod_daily;
    let id = format!("daily-priming-{}", prime.time);
    if !prime.enabled {
        plan.skip(id, SkipReason::Disabled);
        return;
    }
    if let Some(time) = plan.time(&id, &prime.time) {
        plan.add(id, Trigger::Daily { time }, JobAction::Prime);
    }
}

fn plan_led_night_mode(plan: &mut JobPlan, settings: &Settings) {
    let led = &settings.led_night_mode;
    let id = "led-night-mode";
    if !led.enabled {
        plan.skip(id, SkipReason::Disabled);
        return;
    }
    let start = plan.time(id, &led.night_start_time);
    let end = plan.time(id, &led.night_end_time);
    if start.is_some() && end.is_some() {
        plan.add(
            id.to_string(),
            Trigger::EveryMinute,
            JobAction::LedNightMode(led.clone()),
        );
    }
}

fn plan_away_resumes(plan: &mut JobPlan, settings: &Settings) {
    for side in Side::ALL {
        let side_settings = settings.side(side);
        let Some(raw) = side_settings.away_return.as_deref() else {
            continue;
        };
        if !side_settings.away_mode {
            continue;
        }
        match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => plan.add(
                format!("away-resume-{side}"),
                Trigger::At(at.with_timezone(&Utc)),
                JobAction::AwayResume { side },
            ),
            Err(_) => plan.errors.push(PlanError::InvalidAwayReturn {
                side,
                value: raw.to_string(),
            }),
        }
    }
}

/// Brightness the LED should show at `current` minutes past local midnight.
pub fn led_brightness_at(led: &LedNightMode, current: u16) -> Result<u8, TimeError> {
    let start = parse_time_to_minutes(&led.night_start_time)?;
    let end = parse_time_to_minutes(&led.night_end_time)?;
    Ok(if is_window_active(start, end, current) {
        led.night_brightness
    } else {
        led.day_brightness
    })
}
