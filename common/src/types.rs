use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIN_TEMPERATURE_F: i32 = 55;
pub const MAX_TEMPERATURE_F: i32 = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideStatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_temperature_f: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_alarm_vibrating: Option<bool>,
}

impl SideStatusUpdate {
    pub fn power_on(target_temperature_f: i32) -> Self {
        Self {
            is_on: Some(true),
            target_temperature_f: Some(target_temperature_f),
            ..Default::default()
        }
    }

    pub fn power_off() -> Self {
        Self {
            is_on: Some(false),
            ..Default::default()
        }
    }

    pub fn target(target_temperature_f: i32) -> Self {
        Self {
            target_temperature_f: Some(target_temperature_f),
            ..Default::default()
        }
    }

    /// True when the update would heat/cool the side or extend its run time.
    /// Away-mode sides only accept the complement of this.
    pub fn changes_climate(&self) -> bool {
        if self.is_on == Some(false) {
            return false;
        }
        self.is_on.is_some() || self.target_temperature_f.is_some() || self.seconds_remaining.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_left: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_right: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_brightness: Option<u8>,
}

impl DeviceSettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.v.is_none()
            && self.gain_left.is_none()
            && self.gain_right.is_none()
            && self.led_brightness.is_none()
    }
}

/// Typed partial update of live device state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<SideStatusUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<SideStatusUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_priming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<DeviceSettingsUpdate>,
}

impl DeviceStatusUpdate {
    pub fn for_side(side: Side, update: SideStatusUpdate) -> Self {
        let mut status = Self::default();
        *status.side_mut(side) = Some(update);
        status
    }

    pub fn led_brightness(brightness: u8) -> Self {
        Self {
            settings: Some(DeviceSettingsUpdate {
                led_brightness: Some(brightness),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn priming() -> Self {
        Self {
            is_priming: Some(true),
            ..Default::default()
        }
    }

    pub fn side(&self, side: Side) -> Option<&SideStatusUpdate> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut Option<SideStatusUpdate> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    NotStarted,
    Started,
    Healthy,
    Retrying,
    Restarting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub name: String,
    pub status: ServiceState,
    pub description: String,
    pub message: String,
}

impl StatusInfo {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ServiceState::NotStarted,
            description: description.to_string(),
            message: String::new(),
        }
    }
}

/// Per-component health of the controller process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub franken: StatusInfo,
    pub jobs: StatusInfo,
    pub system_date: StatusInfo,
    pub power_schedule: StatusInfo,
    pub temperature_schedule: StatusInfo,
    pub elevation_schedule: StatusInfo,
    pub alarm_schedule: StatusInfo,
    pub prime_schedule: StatusInfo,
    pub led_night_mode: StatusInfo,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self {
            franken: StatusInfo::new("Franken sock", "Socket service for controlling the hardware"),
            jobs: StatusInfo::new(
                "Job scheduler",
                "Scheduling service for temperature changes, alarms, and maintenance",
            ),
            system_date: StatusInfo::new(
                "System date",
                "Whether or not the system date is correct. Scheduling jobs depend on this.",
            ),
            power_schedule: StatusInfo::new("Power schedule", "Power on/off schedule"),
            temperature_schedule: StatusInfo::new(
                "Temperature schedule",
                "Temperature adjustment schedule",
            ),
            elevation_schedule: StatusInfo::new("Elevation schedule", "Base elevation schedule"),
            alarm_schedule: StatusInfo::new("Alarm schedule", "Wake alarm schedule"),
            prime_schedule: StatusInfo::new("Prime schedule", "Daily prime job"),
            led_night_mode: StatusInfo::new("LED night mode", "Night-light dimming"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Franken,
    Jobs,
    SystemDate,
    PowerSchedule,
    TemperatureSchedule,
    ElevationSchedule,
    AlarmSchedule,
    PrimeSchedule,
    LedNightMode,
}

impl ServerStatus {
    pub fn entry_mut(&mut self, component: Component) -> &mut StatusInfo {
        match component {
            Component::Franken => &mut self.franken,
            Component::Jobs => &mut self.jobs,
            Component::SystemDate => &mut self.system_date,
            Component::PowerSchedule => &mut self.power_schedule,
            Component::TemperatureSchedule => &mut self.temperature_schedule,
            Component::ElevationSchedule => &mut self.elevation_schedule,
            Component::AlarmSchedule => &mut self.alarm_schedule,
            Component::PrimeSchedule => &mut self.prime_schedule,
            Component::LedNightMode => &mut self.led_night_mode,
        }
    }
}
