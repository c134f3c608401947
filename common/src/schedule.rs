use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::ScheduleError,
    time::{parse_time_to_minutes, DayOfWeek},
    types::{Side, MAX_TEMPERATURE_F, MIN_TEMPERATURE_F},
};

pub const SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_FEED_RATE: u8 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PowerSchedule {
    pub on: String,
    pub off: String,
    pub enabled: bool,
    pub on_temperature: i32,
}

impl Default for PowerSchedule {
    fn default() -> Self {
        Self {
            on: "21:00".to_string(),
            off: "09:00".to_string(),
            enabled: false,
            on_temperature: 82,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VibrationPattern {
    Double,
    Rise,
}

impl VibrationPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Rise => "rise",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlarmSchedule {
    pub time: String,
    pub vibration_intensity: u8,
    pub vibration_pattern: VibrationPattern,
    /// Seconds.
    pub duration: u32,
    pub enabled: bool,
    pub alarm_temperature: i32,
}

impl Default for AlarmSchedule {
    fn default() -> Self {
        Self {
            time: "09:00".to_string(),
            vibration_intensity: 1,
            vibration_pattern: VibrationPattern::Rise,
            duration: 1,
            enabled: false,
            alarm_temperature: 82,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasePreset {
    Flat,
    Sleep,
    Relax,
    Read,
}

impl BasePreset {
    pub fn position(self) -> BasePosition {
        let (head, feet) = match self {
            Self::Flat => (0, 0),
            Self::Sleep => (1, 5),
            Self::Relax => (30, 15),
            Self::Read => (40, 0),
        };
        BasePosition {
            head,
            feet,
            feed_rate: DEFAULT_FEED_RATE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Sleep => "sleep",
            Self::Relax => "relax",
            Self::Read => "read",
        }
    }
}

/// Fully resolved base position, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasePosition {
    pub head: u8,
    pub feet: u8,
    pub feed_rate: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BaseElevation {
    Preset {
        preset: BasePreset,
    },
    Custom {
        head: u8,
        feet: u8,
        #[serde(rename = "feedRate", default, skip_serializing_if = "Option::is_none")]
        feed_rate: Option<u8>,
    },
}

impl BaseElevation {
    pub fn resolve(&self) -> BasePosition {
        match *self {
            Self::Preset { preset } => preset.position(),
            Self::Custom {
                head,
                feet,
                feed_rate,
            } => BasePosition {
                head,
                feet,
                feed_rate: feed_rate.filter(|rate| *rate > 0).unwrap_or(DEFAULT_FEED_RATE),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DailySchedule {
    pub temperatures: BTreeMap<String, i32>,
    pub power: PowerSchedule,
    pub alarm: AlarmSchedule,
    pub elevations: BTreeMap<String, BaseElevation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SideSchedule {
    pub sunday: DailySchedule,
    pub monday: DailySchedule,
    pub tuesday: DailySchedule,
    pub wednesday: DailySchedule,
    pub thursday: DailySchedule,
    pub friday: DailySchedule,
    pub saturday: DailySchedule,
}

impl SideSchedule {
    pub fn day(&self, day: DayOfWeek) -> &DailySchedule {
        match day {
            DayOfWeek::Sunday => &self.sunday,
            DayOfWeek::Monday => &self.monday,
            DayOfWeek::Tuesday => &self.tuesday,
            DayOfWeek::Wednesday => &self.wednesday,
            DayOfWeek::Thursday => &self.thursday,
            DayOfWeek::Friday => &self.friday,
            DayOfWeek::Saturday => &self.saturday,
        }
    }

    pub fn day_mut(&mut self, day: DayOfWeek) -> &mut DailySchedule {
        match day {
            DayOfWeek::Sunday => &mut self.sunday,
            DayOfWeek::Monday => &mut self.monday,
            DayOfWeek::Tuesday => &mut self.tuesday,
            DayOfWeek::Wednesday => &mut self.wednesday,
            DayOfWeek::Thursday => &mut self.thursday,
            DayOfWeek::Friday => &mut self.friday,
            DayOfWeek::Saturday => &mut self.saturday,
        }
    }

    pub fn days(&self) -> impl Iterator<Item = (DayOfWeek, &DailySchedule)> {
        DayOfWeek::ALL.into_iter().map(move |day| (day, self.day(day)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedules {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub left: SideSchedule,
    pub right: SideSchedule,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            left: SideSchedule::default(),
            right: SideSchedule::default(),
        }
    }
}

impl Schedules {
    pub fn side(&self, side: Side) -> &SideSchedule {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideSchedule {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn schedule_for_day(&self, side: Side, day: DayOfWeek) -> &DailySchedule {
        self.side(side).day(day)
    }

    /// Applies a partial update after validating every field it carries.
    /// Nothing is written when validation fails.
    pub fn apply(&mut self, update: &SchedulesUpdate) -> Result<(), ScheduleError> {
        update.validate()?;
        for side in Side::ALL {
            let Some(days) = update.side(side) else {
                continue;
            };
            for (day, day_update) in days {
                self.side_mut(side).day_mut(*day).apply(day_update);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUpdate {
    pub on: Option<String>,
    pub off: Option<String>,
    pub enabled: Option<bool>,
    pub on_temperature: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmUpdate {
    pub time: Option<String>,
    pub vibration_intensity: Option<u8>,
    pub vibration_pattern: Option<VibrationPattern>,
    pub duration: Option<u32>,
    pub enabled: Option<bool>,
    pub alarm_temperature: Option<i32>,
}

/// Partial day update. `temperatures` and `elevations`, when present,
/// replace the stored maps rather than merging into them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyScheduleUpdate {
    pub power: Option<PowerUpdate>,
    pub alarm: Option<AlarmUpdate>,
    pub temperatures: Option<BTreeMap<String, i32>>,
    pub elevations: Option<BTreeMap<String, BaseElevation>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulesUpdate {
    pub left: Option<BTreeMap<DayOfWeek, DailyScheduleUpdate>>,
    pub right: Option<BTreeMap<DayOfWeek, DailyScheduleUpdate>>,
}

impl SchedulesUpdate {
    pub fn side(&self, side: Side) -> Option<&BTreeMap<DayOfWeek, DailyScheduleUpdate>> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        Side::ALL
            .into_iter()
            .filter_map(|side| self.side(side))
            .flat_map(|days| days.values())
            .try_for_each(DailyScheduleUpdate::validate)
    }
}

impl DailyScheduleUpdate {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if let Some(power) = &self.power {
            for time in [&power.on, &power.off].into_iter().flatten() {
                parse_time_to_minutes(time)?;
            }
            if let Some(temp) = power.on_temperature {
                check_temperature(temp)?;
            }
        }
        if let Some(alarm) = &self.alarm {
            if let Some(time) = &alarm.time {
                parse_time_to_minutes(time)?;
            }
            if let Some(intensity) = alarm.vibration_intensity {
                if !(1..=100).contains(&intensity) {
                    return Err(ScheduleError::OutOfRange {
                        field: "vibrationIntensity",
                        value: i64::from(intensity),
                    });
                }
            }
            if let Some(duration) = alarm.duration {
                if duration > 180 {
                    return Err(ScheduleError::OutOfRange {
                        field: "duration",
                        value: i64::from(duration),
                    });
                }
            }
            if let Some(temp) = alarm.alarm_temperature {
                check_temperature(temp)?;
            }
        }
        if let Some(temperatures) = &self.temperatures {
            for (time, temp) in temperatures {
                parse_time_to_minutes(time)?;
                check_temperature(*temp)?;
            }
        }
        if let Some(elevations) = &self.elevations {
            for (time, elevation) in elevations {
                parse_time_to_minutes(time)?;
                if let BaseElevation::Custom { head, feet, .. } = elevation {
                    if *head > 60 || *feet > 45 {
                        return Err(ScheduleError::OutOfRange {
                            field: "elevation",
                            value: i64::from((*head).max(*feet)),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl DailySchedule {
    pub fn apply(&mut self, update: &DailyScheduleUpdate) {
        if let Some(power) = &update.power {
            if let Some(on) = &power.on {
                self.power.on = on.clone();
            }
            if let Some(off) = &power.off {
                self.power.off = off.clone();
            }
            if let Some(enabled) = power.enabled {
                self.power.enabled = enabled;
            }
            if let Some(temp) = power.on_temperature {
                self.power.on_temperature = temp;
            }
        }
        if let Some(alarm) = &update.alarm {
            if let Some(time) = &alarm.time {
                self.alarm.time = time.clone();
            }
            if let Some(intensity) = alarm.vibration_intensity {
                self.alarm.vibration_intensity = intensity;
            }
            if let Some(pattern) = alarm.vibration_pattern {
                self.alarm.vibration_pattern = pattern;
            }
            if let Some(duration) = alarm.duration {
                self.alarm.duration = duration;
            }
            if let Some(enabled) = alarm.enabled {
                self.alarm.enabled = enabled;
            }
            if let Some(temp) = alarm.alarm_temperature {
                self.alarm.alarm_temperature = temp;
            }
        }
        if let Some(temperatures) = &update.temperatures {
            self.temperatures = temperatures.clone();
        }
        if let Some(elevations) = &update.elevations {
            self.elevations = elevations.clone();
        }
    }
}

fn check_temperature(temp: i32) -> Result<(), ScheduleError> {
    if (MIN_TEMPERATURE_F..=MAX_TEMPERATURE_F).contains(&temp) {
        Ok(())
    } else {
        Err(ScheduleError::OutOfRange {
            field: "temperature",
            value: i64::from(temp),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::TimeError;

    #[test]
    fn backfills_missing_days_and_fields() {
        let raw = json!({
            "left": {
                "monday": {
                    "power": { "on": "22:00", "off": "07:00", "enabled": true, "onTemperature": 75 }
                }
            }
        });

        let schedules: Schedules = serde_json::from_value(raw).unwrap();

        assert_eq!(schedules.left.monday.power.on, "22:00");
        assert_eq!(schedules.left.monday.alarm, AlarmSchedule::default());
        assert!(schedules.left.monday.temperatures.is_empty());
        assert_eq!(schedules.left.sunday, DailySchedule::default());
        assert_eq!(schedules.right, SideSchedule::default());
    }

    #[test]
    fn partial_power_and_alarm_records_take_template_values() {
        let raw = json!({
            "power": { "on": "22:30", "off": "06:00", "enabled": true },
            "alarm": { "time": "06:15", "vibrationIntensity": 40, "enabled": true }
        });

        let day: DailySchedule = serde_json::from_value(raw).unwrap();

        assert_eq!(day.power.on_temperature, 82);
        assert_eq!(day.power.on, "22:30");
        assert_eq!(day.alarm.alarm_temperature, 82);
        assert_eq!(day.alarm.vibration_pattern, VibrationPattern::Rise);
        assert_eq!(day.alarm.vibration_intensity, 40);
    }

    #[test]
    fn elevation_accepts_preset_and_custom_shapes() {
        let raw = json!({
            "22:00": { "preset": "relax" },
            "23:00": { "head": 10, "feet": 5 },
            "23:30": { "head": 12, "feet": 4, "feedRate": 80 }
        });

        let elevations: BTreeMap<String, BaseElevation> = serde_json::from_value(raw).unwrap();

        assert_eq!(
            elevations["22:00"].resolve(),
            BasePosition { head: 30, feet: 15, feed_rate: 50 }
        );
        assert_eq!(
            elevations["23:00"].resolve(),
            BasePosition { head: 10, feet: 5, feed_rate: 50 }
        );
        assert_eq!(
            elevations["23:30"].resolve(),
            BasePosition { head: 12, feet: 4, feed_rate: 80 }
        );
    }

    #[test]
    fn partial_update_touches_only_named_fields() {
        let mut schedules = Schedules::default();
        schedules.left.friday.temperatures.insert("23:00".into(), 70);

        let update = SchedulesUpdate {
            left: Some(BTreeMap::from([(
                DayOfWeek::Friday,
                DailyScheduleUpdate {
                    power: Some(PowerUpdate {
                        enabled: Some(true),
                        ..Default::default()
                    }),
                    temperatures: Some(BTreeMap::from([("01:00".to_string(), 68)])),
                    ..Default::default()
                },
            )])),
            right: None,
        };

        schedules.apply(&update).unwrap();

        let friday = &schedules.left.friday;
        assert!(friday.power.enabled);
        assert_eq!(friday.power.on, "21:00");
        assert_eq!(friday.temperatures, BTreeMap::from([("01:00".to_string(), 68)]));
        assert_eq!(schedules.right, SideSchedule::default());
    }

    #[test]
    fn invalid_update_leaves_schedule_untouched() {
        let mut schedules = Schedules::default();
        let update = SchedulesUpdate {
            left: Some(BTreeMap::from([
                (
                    DayOfWeek::Monday,
                    DailyScheduleUpdate {
                        power: Some(PowerUpdate {
                            enabled: Some(true),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ),
                (
                    DayOfWeek::Tuesday,
                    DailyScheduleUpdate {
                        alarm: Some(AlarmUpdate {
                            time: Some("7:00".into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ),
            ])),
            right: None,
        };

        let err = schedules.apply(&update).unwrap_err();

        assert!(matches!(
            err,
            ScheduleError::Time(TimeError::InvalidTimeFormat(ref raw)) if raw == "7:00"
        ));
        assert_eq!(schedules, Schedules::default());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let update = DailyScheduleUpdate {
            temperatures: Some(BTreeMap::from([("22:00".to_string(), 120)])),
            ..Default::default()
        };
        assert!(matches!(
            update.validate(),
            Err(ScheduleError::OutOfRange { field: "temperature", value: 120 })
        ));
    }
}
