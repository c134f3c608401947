//! Upgrades persisted schedules from the legacy single-value layout.
//!
//! A legacy day carries one `temperature` and/or one `elevation` that applied
//! at power-on. The current layout keys any number of changes by time of day
//! in `temperatures` and `elevations`. Detection is by shape so hand-edited
//! files are handled; migrated output also carries `schemaVersion`.

use serde_json::{Map, Value};

use crate::{
    schedule::{PowerSchedule, SCHEMA_VERSION},
    time::DayOfWeek,
    types::Side,
};

const LEGACY_TEMPERATURE: &str = "temperature";
const LEGACY_ELEVATION: &str = "elevation";
const TEMPERATURES: &str = "temperatures";
const ELEVATIONS: &str = "elevations";

fn is_v2_day(day: &Map<String, Value>) -> bool {
    day.get(TEMPERATURES).is_some_and(Value::is_object)
        && day.get(ELEVATIONS).is_some_and(Value::is_object)
        && !day.contains_key(LEGACY_TEMPERATURE)
        && !day.contains_key(LEGACY_ELEVATION)
}

/// True when every weekday present on this side already uses the keyed maps.
/// An absent side has nothing to migrate.
pub fn is_v2_side(side: &Value) -> bool {
    match side {
        Value::Null => true,
        Value::Object(days) => DayOfWeek::ALL.iter().all(|day| match days.get(day.as_str()) {
            None | Some(Value::Null) => true,
            Some(Value::Object(day)) => is_v2_day(day),
            Some(_) => false,
        }),
        _ => false,
    }
}

pub fn is_v2(schedules: &Value) -> bool {
    Side::ALL
        .iter()
        .all(|side| is_v2_side(schedules.get(side.as_str()).unwrap_or(&Value::Null)))
}

fn power_on_time(day: &Map<String, Value>) -> String {
    day.get("power")
        .and_then(|power| power.get("on"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| PowerSchedule::default().on)
}

fn migrate_field(day: &mut Map<String, Value>, legacy: &str, keyed: &str, on: &str) {
    let value = day.remove(legacy).filter(|value| !value.is_null());

    let map = day
        .entry(keyed.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !map.is_object() {
        *map = Value::Object(Map::new());
    }

    if let (Some(value), Value::Object(map)) = (value, map) {
        map.entry(on.to_string()).or_insert(value);
    }
}

fn migrate_day(day: &mut Map<String, Value>) {
    if is_v2_day(day) {
        return;
    }
    let on = power_on_time(day);
    migrate_field(day, LEGACY_TEMPERATURE, TEMPERATURES, &on);
    migrate_field(day, LEGACY_ELEVATION, ELEVATIONS, &on);
}

fn migrate_side(side: &mut Value) {
    let Value::Object(days) = side else {
        return;
    };
    for day in DayOfWeek::ALL {
        if let Some(Value::Object(day)) = days.get_mut(day.as_str()) {
            migrate_day(day);
        }
    }
}

/// Rewrites legacy days in place of their keyed-map equivalents. Days that
/// already use the keyed layout are left untouched.
pub fn migrate(mut schedules: Value) -> Value {
    if let Value::Object(root) = &mut schedules {
        for side in Side::ALL {
            if let Some(side) = root.get_mut(side.as_str()) {
                migrate_side(side);
            }
        }
        root.insert("schemaVersion".to_string(), Value::from(SCHEMA_VERSION));
    }
    schedules
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn legacy() -> Value {
        json!({
            "left": {
                "monday": {
                    "temperature": 78,
                    "elevation": { "preset": "sleep" },
                    "power": { "on": "22:30", "off": "07:00", "enabled": true, "onTemperature": 80 },
                    "alarm": { "time": "07:00", "enabled": false }
                }
            },
            "right": {
                "monday": {
                    "temperatures": { "23:00": 70 },
                    "elevations": {},
                    "power": { "on": "21:00", "off": "06:00", "enabled": true, "onTemperature": 80 }
                }
            }
        })
    }

    #[test]
    fn legacy_values_are_keyed_at_power_on() {
        let migrated = migrate(legacy());

        let monday = &migrated["left"]["monday"];
        assert_eq!(monday["temperatures"], json!({ "22:30": 78 }));
        assert_eq!(monday["elevations"], json!({ "22:30": { "preset": "sleep" } }));
        assert!(monday.get("temperature").is_none());
        assert!(monday.get("elevation").is_none());
        assert_eq!(monday["alarm"], json!({ "time": "07:00", "enabled": false }));
        assert_eq!(migrated["schemaVersion"], json!(2));
    }

    #[test]
    fn keyed_days_are_left_alone() {
        let raw = legacy();
        assert!(!is_v2(&raw));
        assert!(is_v2_side(&raw["right"]));

        let migrated = migrate(raw.clone());
        assert_eq!(migrated["right"], raw["right"]);
    }

    #[test]
    fn migration_is_idempotent() {
        let once = migrate(legacy());
        assert!(is_v2(&once));
        assert_eq!(migrate(once.clone()), once);
    }

    #[test]
    fn day_without_legacy_values_gets_empty_maps() {
        let migrated = migrate(json!({
            "left": { "friday": { "power": { "on": "20:00" } } }
        }));
        assert_eq!(migrated["left"]["friday"]["temperatures"], json!({}));
        assert_eq!(migrated["left"]["friday"]["elevations"], json!({}));
    }

    #[test]
    fn missing_power_on_falls_back_to_default_time() {
        let migrated = migrate(json!({ "left": { "sunday": { "temperature": 72 } } }));
        assert_eq!(migrated["left"]["sunday"]["temperatures"], json!({ "21:00": 72 }));
    }

    #[test]
    fn empty_document_is_already_current() {
        assert!(is_v2(&json!({})));
        assert!(!is_v2_side(&json!([])));
    }
}
