use std::time::Duration;

use podctl_common::{ProtocolError, Side};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no reply from device after {after:?}")]
    Timeout { after: Duration },
    #[error("device stream ended")]
    StreamEnded,
    #[error("device is not connected")]
    NotConnected,
    #[error("device io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0} side is in away mode, not updating side")]
    AwayMode(Side),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("base control failed: {0}")]
    Base(String),
}
