use thiserror::Error;

use crate::types::Side;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("invalid time format '{0}', expected HH:mm")]
    InvalidTimeFormat(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode cbor payload: {0}")]
    Encode(String),
    #[error("invalid command argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unknown time zone '{0}'")]
    UnknownTimezone(String),
    #[error("{job}: {source}")]
    InvalidTime {
        job: String,
        #[source]
        source: TimeError,
    },
    #[error("invalid away return for {side}: '{value}'")]
    InvalidAwayReturn { side: Side, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}
