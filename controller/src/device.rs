use std::sync::Arc;

use async_trait::async_trait;
use podctl_common::{
    protocol::{duration_arg, settings_request, temperature_level, POWER_ON_DURATION_SECS},
    types::{MAX_TEMPERATURE_F, MIN_TEMPERATURE_F},
    BasePosition, DeviceCommand, DeviceRequest, DeviceStatusUpdate, ProtocolError, Side,
    SideStatusUpdate,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    error::{DeviceError, TransportError},
    store::AppStore,
    transport::DeviceLink,
};

/// Issues one request to the hardware and returns its reply.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn execute(&self, request: &DeviceRequest) -> Result<String, TransportError>;
}

#[async_trait]
impl DeviceControl for DeviceLink {
    async fn execute(&self, request: &DeviceRequest) -> Result<String, TransportError> {
        DeviceLink::execute(self, request).await
    }
}

/// Adjustable base driver. Each side of the base moves together.
#[async_trait]
pub trait BaseController: Send + Sync {
    async fn set_position(&self, position: BasePosition) -> Result<(), DeviceError>;
}

/// Base driver for hosts without a radio link to the base. It records the
/// last commanded position and logs it.
#[derive(Debug, Default)]
pub struct LoggingBase {
    last: Mutex<Option<BasePosition>>,
}

impl LoggingBase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaseController for LoggingBase {
    async fn set_position(&self, position: BasePosition) -> Result<(), DeviceError> {
        if [position.head, position.feet, position.feed_rate]
            .iter()
            .any(|percent| *percent > 100)
        {
            return Err(DeviceError::Base(format!("position {position:?} is not in percent")));
        }
        let previous = self.last.lock().await.replace(position);
        info!(
            "base position head={} feet={} feed_rate={} (was {previous:?})",
            position.head, position.feet, position.feed_rate
        );
        Ok(())
    }
}

/// Turns typed device status updates into hardware commands.
#[derive(Clone)]
pub struct DeviceStatusService {
    device: Arc<dyn DeviceControl>,
    store: AppStore,
}

impl DeviceStatusService {
    pub fn new(device: Arc<dyn DeviceControl>, store: AppStore) -> Self {
        Self { device, store }
    }

    pub fn device(&self) -> &Arc<dyn DeviceControl> {
        &self.device
    }

    /// Sends every command implied by `update`, stopping at the first
    /// failure.
    pub async fn update(&self, update: &DeviceStatusUpdate) -> Result<(), DeviceError> {
        let settings = self.store.settings().await;

        for side in Side::ALL {
            let Some(side_update) = update.side(side) else {
                continue;
            };
            if settings.is_away(side) && side_update.changes_climate() {
                return Err(DeviceError::AwayMode(side));
            }
            for request in side_requests(side, side_update)? {
                self.device.execute(&request).await?;
            }
        }

        if update.is_priming == Some(true) {
            self.device
                .execute(&DeviceRequest::empty(DeviceCommand::Prime))
                .await?;
        }

        if let Some(device_settings) = &update.settings {
            self.device.execute(&settings_request(device_settings)?).await?;
        }
        Ok(())
    }
}

fn side_requests(side: Side, update: &SideStatusUpdate) -> Result<Vec<DeviceRequest>, ProtocolError> {
    let mut requests = Vec::new();

    if let Some(is_on) = update.is_on {
        let seconds = if is_on { POWER_ON_DURATION_SECS } else { 0 };
        requests.push(DeviceRequest::new(
            DeviceCommand::duration_for(side),
            seconds.to_string(),
        ));
    }

    if let Some(target) = update.target_temperature_f {
        if !(MIN_TEMPERATURE_F..=MAX_TEMPERATURE_F).contains(&target) {
            return Err(ProtocolError::InvalidArgument(format!(
                "target temperature {target}F is outside {MIN_TEMPERATURE_F}-{MAX_TEMPERATURE_F}F"
            )));
        }
        requests.push(DeviceRequest::new(
            DeviceCommand::temp_level_for(side),
            temperature_level(target).to_string(),
        ));
    }

    if let Some(seconds) = update.seconds_remaining.filter(|s| *s != 0.0) {
        requests.push(DeviceRequest::new(
            DeviceCommand::duration_for(side),
            duration_arg(seconds)?,
        ));
    }

    if update.is_alarm_vibrating == Some(false) {
        requests.push(DeviceRequest::empty(DeviceCommand::AlarmClear));
    }

    Ok(requests)
}
