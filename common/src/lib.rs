pub mod config;
pub mod error;
pub mod jobs;
pub mod migration;
pub mod protocol;
pub mod schedule;
pub mod time;
pub mod trigger;
pub mod types;
pub mod window;

pub use config::{ControllerConfig, LedNightMode, Settings, SettingsUpdate};
pub use error::{PlanError, ProtocolError, ScheduleError, TimeError};
pub use jobs::{plan_jobs, JobAction, JobPlan, JobSpec, PlanOptions};
pub use protocol::{DeviceCommand, DeviceRequest};
pub use schedule::{BaseElevation, BasePosition, DailySchedule, Schedules, SchedulesUpdate};
pub use time::{DayOfWeek, TimeOfDay};
pub use trigger::Trigger;
pub use types::{
    Component, DeviceStatusUpdate, ServerStatus, ServiceState, Side, SideStatusUpdate, StatusInfo,
};
