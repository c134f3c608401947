use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ScheduleError, TimeError},
    time::parse_time_to_minutes,
    types::Side,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SideSettings {
    pub name: String,
    pub away_mode: bool,
    /// RFC 3339 instant at which away mode ends on its own.
    pub away_return: Option<String>,
}

impl SideSettings {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            away_mode: false,
            away_return: None,
        }
    }
}

impl Default for SideSettings {
    fn default() -> Self {
        Self::named("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedNightMode {
    pub enabled: bool,
    pub night_start_time: String,
    pub night_end_time: String,
    pub day_brightness: u8,
    pub night_brightness: u8,
}

impl Default for LedNightMode {
    fn default() -> Self {
        Self {
            enabled: false,
            night_start_time: "22:00".to_string(),
            night_end_time: "07:00".to_string(),
            day_brightness: 100,
            night_brightness: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimePodDaily {
    pub enabled: bool,
    pub time: String,
}

impl Default for PrimePodDaily {
    fn default() -> Self {
        Self {
            enabled: false,
            time: "14:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisDaily {
    pub enabled: bool,
    pub time: String,
    pub estimated_sleep_start: String,
    pub estimated_sleep_end: String,
}

impl Default for AnalysisDaily {
    fn default() -> Self {
        Self {
            enabled: false,
            time: "10:00".to_string(),
            estimated_sleep_start: "22:00".to_string(),
            estimated_sleep_end: "07:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureFormat {
    #[default]
    Fahrenheit,
    Celsius,
}

/// User settings read by the job planner. Owned by the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub time_zone: Option<String>,
    pub temperature_format: TemperatureFormat,
    pub left: SideSettings,
    pub right: SideSettings,
    pub link_both_sides: bool,
    pub led_night_mode: LedNightMode,
    pub prime_pod_daily: PrimePodDaily,
    pub analysis_daily: AnalysisDaily,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_zone: None,
            temperature_format: TemperatureFormat::Fahrenheit,
            left: SideSettings::named("Left"),
            right: SideSettings::named("Right"),
            link_both_sides: false,
            led_night_mode: LedNightMode::default(),
            prime_pod_daily: PrimePodDaily::default(),
            analysis_daily: AnalysisDaily::default(),
        }
    }
}

impl Settings {
    pub fn side(&self, side: Side) -> &SideSettings {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideSettings {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn is_away(&self, side: Side) -> bool {
        self.side(side).away_mode
    }

    /// Configured zone, `None` when unset or not a known IANA name.
    pub fn timezone(&self) -> Option<Tz> {
        self.time_zone.as_deref().and_then(|name| name.parse().ok())
    }

    pub fn sanitize(&mut self) {
        self.led_night_mode.day_brightness = self.led_night_mode.day_brightness.min(100);
        self.led_night_mode.night_brightness = self.led_night_mode.night_brightness.min(100);
        if self.time_zone.as_deref().is_some_and(str::is_empty) {
            self.time_zone = None;
        }
    }

    pub fn apply(&mut self, update: &SettingsUpdate) -> Result<(), ScheduleError> {
        update.validate()?;

        if let Some(time_zone) = &update.time_zone {
            self.time_zone = time_zone.clone();
        }
        if let Some(format) = update.temperature_format {
            self.temperature_format = format;
        }
        for side in Side::ALL {
            let Some(side_update) = update.side(side) else {
                continue;
            };
            let current = self.side_mut(side);
            if let Some(name) = &side_update.name {
                current.name = name.clone();
            }
            if let Some(away) = side_update.away_mode {
                current.away_mode = away;
                if !away {
                    current.away_return = None;
                }
            }
            if let Some(away_return) = &side_update.away_return {
                current.away_return = away_return.clone();
            }
        }
        if let Some(linked) = update.link_both_sides {
            self.link_both_sides = linked;
        }
        if let Some(led) = &update.led_night_mode {
            self.led_night_mode = led.clone();
        }
        if let Some(prime) = &update.prime_pod_daily {
            self.prime_pod_daily = prime.clone();
        }
        if let Some(analysis) = &update.analysis_daily {
            self.analysis_daily = analysis.clone();
        }
        self.sanitize();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideSettingsUpdate {
    pub name: Option<String>,
    pub away_mode: Option<bool>,
    #[serde(default, with = "double_option")]
    pub away_return: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default, with = "double_option")]
    pub time_zone: Option<Option<String>>,
    pub temperature_format: Option<TemperatureFormat>,
    pub left: Option<SideSettingsUpdate>,
    pub right: Option<SideSettingsUpdate>,
    pub link_both_sides: Option<bool>,
    pub led_night_mode: Option<LedNightMode>,
    pub prime_pod_daily: Option<PrimePodDaily>,
    pub analysis_daily: Option<AnalysisDaily>,
}

impl SettingsUpdate {
    pub fn side(&self, side: Side) -> Option<&SideSettingsUpdate> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    pub fn validate(&self) -> Result<(), TimeError> {
        if let Some(led) = &self.led_night_mode {
            parse_time_to_minutes(&led.night_start_time)?;
            parse_time_to_minutes(&led.night_end_time)?;
        }
        if let Some(prime) = &self.prime_pod_daily {
            parse_time_to_minutes(&prime.time)?;
        }
        if let Some(analysis) = &self.analysis_daily {
            parse_time_to_minutes(&analysis.time)?;
            parse_time_to_minutes(&analysis.estimated_sleep_start)?;
            parse_time_to_minutes(&analysis.estimated_sleep_end)?;
        }
        Ok(())
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Option<String>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<String>>, D::Error> {
        Option::<String>::deserialize(deserializer).map(Some)
    }
}

/// Process-level configuration of the controller binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub http_port: u16,
    pub command_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconcile_on_start: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./.podctl"),
            socket_path: PathBuf::from("/deviceinfo/dac.sock"),
            http_port: 3000,
            command_timeout_ms: 5_000,
            read_timeout_ms: 5_000,
            settle_delay_ms: 50,
            connect_timeout_ms: 5_000,
            reconcile_on_start: true,
        }
    }
}

impl ControllerConfig {
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("lowdb")
    }
}
