use std::{collections::BTreeMap, fmt};

use serde::Serialize;

use crate::{
    error::ProtocolError,
    schedule::AlarmSchedule,
    types::{DeviceSettingsUpdate, Side},
};

/// Separates request and reply frames on the hardware socket.
pub const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Argument sent for commands that take none.
pub const EMPTY_ARG: &str = "empty";

/// Duration written to a side's run timer when it is switched on (12 h).
pub const POWER_ON_DURATION_SECS: u32 = 43_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    Hello,
    SetTemp,
    SetAlarm,
    AlarmLeft,
    AlarmRight,
    SetSettings,
    LeftTempDuration,
    RightTempDuration,
    TempLevelLeft,
    TempLevelRight,
    Prime,
    DeviceStatus,
    AlarmClear,
    AlarmSolo,
}

impl DeviceCommand {
    pub fn code(self) -> &'static str {
        match self {
            Self::Hello => "0",
            Self::SetTemp => "1",
            Self::SetAlarm => "2",
            Self::AlarmLeft => "5",
            Self::AlarmRight => "6",
            Self::SetSettings => "8",
            Self::LeftTempDuration => "9",
            Self::RightTempDuration => "10",
            Self::TempLevelLeft => "11",
            Self::TempLevelRight => "12",
            Self::Prime => "13",
            Self::DeviceStatus => "14",
            Self::AlarmClear => "16",
            Self::AlarmSolo => "17",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::SetTemp => "SET_TEMP",
            Self::SetAlarm => "SET_ALARM",
            Self::AlarmLeft => "ALARM_LEFT",
            Self::AlarmRight => "ALARM_RIGHT",
            Self::SetSettings => "SET_SETTINGS",
            Self::LeftTempDuration => "LEFT_TEMP_DURATION",
            Self::RightTempDuration => "RIGHT_TEMP_DURATION",
            Self::TempLevelLeft => "TEMP_LEVEL_LEFT",
            Self::TempLevelRight => "TEMP_LEVEL_RIGHT",
            Self::Prime => "PRIME",
            Self::DeviceStatus => "DEVICE_STATUS",
            Self::AlarmClear => "ALARM_CLEAR",
            Self::AlarmSolo => "ALARM_SOLO",
        }
    }

    pub fn alarm_for(side: Side) -> Self {
        match side {
            Side::Left => Self::AlarmLeft,
            Side::Right => Self::AlarmRight,
        }
    }

    pub fn temp_level_for(side: Side) -> Self {
        match side {
            Side::Left => Self::TempLevelLeft,
            Side::Right => Self::TempLevelRight,
        }
    }

    pub fn duration_for(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftTempDuration,
            Side::Right => Self::RightTempDuration,
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One request frame body, without the trailing delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub command: DeviceCommand,
    pub arg: Option<String>,
}

impl DeviceRequest {
    pub fn new(command: DeviceCommand, arg: impl Into<String>) -> Self {
        Self {
            command,
            arg: Some(arg.into()),
        }
    }

    pub fn empty(command: DeviceCommand) -> Self {
        Self::new(command, EMPTY_ARG)
    }

    /// Status poll, sent as the bare command code.
    pub fn status() -> Self {
        Self {
            command: DeviceCommand::DeviceStatus,
            arg: None,
        }
    }

    /// `"{code}\n{arg}"`; newlines inside `arg` are dropped so they cannot
    /// be mistaken for a frame boundary.
    pub fn encode(&self) -> String {
        match &self.arg {
            Some(arg) => {
                let cleaned: String = arg.chars().filter(|c| *c != '\n').collect();
                format!("{}\n{}", self.command.code(), cleaned)
            }
            None => self.command.code().to_string(),
        }
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{} ({})", self.command, arg),
            None => write!(f, "{}", self.command),
        }
    }
}

/// Alarm arming payload. The device itself waits until `tt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmPayload {
    /// Vibration intensity.
    pub pl: u8,
    /// Duration in seconds.
    pub du: u32,
    /// Vibration pattern name.
    pub pi: String,
    /// Trigger time, Unix seconds.
    pub tt: i64,
}

impl AlarmPayload {
    pub fn from_schedule(alarm: &AlarmSchedule, trigger_at: i64) -> Self {
        Self {
            pl: alarm.vibration_intensity,
            du: alarm.duration,
            pi: alarm.vibration_pattern.as_str().to_string(),
            tt: trigger_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gr: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lb: Option<u8>,
}

impl From<&DeviceSettingsUpdate> for WireSettings {
    fn from(settings: &DeviceSettingsUpdate) -> Self {
        Self {
            v: settings.v,
            gl: settings.gain_left,
            gr: settings.gain_right,
            lb: settings.led_brightness,
        }
    }
}

/// CBOR-encodes `value` and renders it as lowercase hex.
pub fn encode_cbor_hex<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|err| ProtocolError::Encode(err.to_string()))?;
    Ok(hex::encode(buf))
}

pub fn alarm_request(side: Side, payload: &AlarmPayload) -> Result<DeviceRequest, ProtocolError> {
    Ok(DeviceRequest::new(
        DeviceCommand::alarm_for(side),
        encode_cbor_hex(payload)?,
    ))
}

pub fn settings_request(settings: &DeviceSettingsUpdate) -> Result<DeviceRequest, ProtocolError> {
    if settings.is_empty() {
        return Err(ProtocolError::InvalidArgument("empty settings update".to_string()));
    }
    Ok(DeviceRequest::new(
        DeviceCommand::SetSettings,
        encode_cbor_hex(&WireSettings::from(settings))?,
    ))
}

/// Maps Fahrenheit onto the device's signed level scale, where 82.5 F is 0
/// and each 27.5 F step is 100 levels. Halves round toward positive infinity.
pub fn temperature_level(temperature_f: i32) -> i32 {
    let level = (f64::from(temperature_f) - 82.5) / 27.5 * 100.0;
    (level + 0.5).floor() as i32
}

/// Rounds a run-timer duration the same way levels are rounded.
pub fn duration_arg(seconds: f64) -> Result<String, ProtocolError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ProtocolError::InvalidArgument(format!(
            "invalid duration {seconds}"
        )));
    }
    Ok(format!("{}", (seconds + 0.5).floor() as u64))
}

/// Parses the `key = value` lines of a status reply.
pub fn parse_variables(reply: &str) -> BTreeMap<String, String> {
    reply
        .lines()
        .filter_map(|line| line.split_once(" = "))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}
