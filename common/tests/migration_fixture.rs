use std::collections::BTreeMap;

use podctl_common::{
    migration::{is_v2, migrate},
    schedule::{BaseElevation, BasePosition, BasePreset, Schedules, SCHEMA_VERSION},
    time::DayOfWeek,
    types::Side,
};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn fixture() -> Value {
    serde_json::from_str(include_str!("fixtures/v1_schedules.json")).unwrap()
}

#[test]
fn legacy_fixture_loads_after_migration() {
    let raw = fixture();
    assert!(!is_v2(&raw));

    let migrated = migrate(raw);
    assert!(is_v2(&migrated));

    let schedules: Schedules = serde_json::from_value(migrated).unwrap();
    assert_eq!(schedules.schema_version, SCHEMA_VERSION);

    let monday = schedules.schedule_for_day(Side::Left, DayOfWeek::Monday);
    assert_eq!(monday.temperatures, BTreeMap::from([("22:15".to_string(), 76)]));
    assert_eq!(
        monday.elevations,
        BTreeMap::from([(
            "22:15".to_string(),
            BaseElevation::Preset {
                preset: BasePreset::Relax
            }
        )])
    );
    assert_eq!(monday.alarm.vibration_intensity, 40);
    assert!(monday.alarm.enabled);

    let tuesday = schedules.schedule_for_day(Side::Left, DayOfWeek::Tuesday);
    assert_eq!(
        tuesday.elevations["23:00"].resolve(),
        BasePosition {
            head: 12,
            feet: 4,
            feed_rate: 50
        }
    );

    let right = schedules.schedule_for_day(Side::Right, DayOfWeek::Monday);
    assert_eq!(right.temperatures, BTreeMap::from([("21:30".to_string(), 68)]));
    // Days absent from the file are filled from defaults.
    assert!(schedules
        .schedule_for_day(Side::Right, DayOfWeek::Friday)
        .temperatures
        .is_empty());
}

#[test]
fn migrating_the_fixture_twice_changes_nothing() {
    let once = migrate(fixture());
    let twice = migrate(once.clone());
    assert_eq!(once, twice);
}

#[test]
fn every_legacy_temperature_survives() {
    let raw = fixture();
    let migrated = migrate(raw.clone());

    for side in ["left", "right"] {
        for (day, legacy) in raw[side].as_object().unwrap() {
            let on = legacy["power"]["on"].as_str().unwrap();
            assert_eq!(
                migrated[side][day]["temperatures"][on], legacy["temperature"],
                "{side} {day}"
            );
        }
    }
}
