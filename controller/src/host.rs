use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use podctl_common::{
    trigger::local_weekday,
    window::{format_countdown, is_currently_running, time_until_start, ScheduleStartInfo},
    ControllerConfig, DeviceStatusUpdate, SchedulesUpdate, SettingsUpdate, Side,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    device::{DeviceStatusService, LoggingBase},
    error::{DeviceError, TransportError},
    scheduler::JobScheduler,
    status::StatusBoard,
    store::AppStore,
    transport::{serve_unix, DeviceLink, TransportOptions},
};

#[derive(Clone)]
struct AppState {
    store: AppStore,
    scheduler: JobScheduler,
    devices: DeviceStatusService,
    link: DeviceLink,
    status: StatusBoard,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SideRunState {
    is_running: bool,
    next_start: Option<ScheduleStartInfo>,
    countdown: Option<String>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = config_from_env(|key| std::env::var(key).ok());
    let status = StatusBoard::new();

    let link = DeviceLink::new(TransportOptions::from(&config), status.clone());
    let socket_link = link.clone();
    let socket_path = config.socket_path.clone();
    tokio::spawn(async move {
        if let Err(err) = serve_unix(socket_link, &socket_path).await {
            warn!("device socket stopped: {err:#}");
        }
    });

    let store = AppStore::open(&config.store_dir())
        .await
        .with_context(|| format!("failed to open store in {}", config.store_dir().display()))?;
    let devices = DeviceStatusService::new(Arc::new(link.clone()), store.clone());
    let scheduler = JobScheduler::new(
        store.clone(),
        devices.clone(),
        Arc::new(LoggingBase::new()),
        status.clone(),
        config.reconcile_on_start,
    );
    scheduler.start();

    let app_state = AppState {
        store,
        scheduler,
        devices,
        link,
        status,
    };

    let app = Router::new()
        .route(
            "/api/schedules",
            get(handle_get_schedules).post(handle_post_schedules),
        )
        .route("/api/schedules/status", get(handle_get_schedule_status))
        .route(
            "/api/settings",
            get(handle_get_settings).post(handle_post_settings),
        )
        .route("/api/deviceStatus", post(handle_post_device_status))
        .route("/api/device/variables", get(handle_get_variables))
        .route("/api/serverStatus", get(handle_get_server_status))
        .route("/api/jobs", get(handle_get_jobs))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the process config from `PODCTL_*` variables, keeping the default
/// for anything unset or unparsable.
fn config_from_env(var: impl Fn(&str) -> Option<String>) -> ControllerConfig {
    fn parsed<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
        value.and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    let defaults = ControllerConfig::default();
    ControllerConfig {
        data_dir: var("PODCTL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir),
        socket_path: var("PODCTL_SOCKET_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.socket_path),
        http_port: parsed(var("PODCTL_HTTP_PORT"), defaults.http_port),
        command_timeout_ms: parsed(var("PODCTL_COMMAND_TIMEOUT_MS"), defaults.command_timeout_ms),
        read_timeout_ms: parsed(var("PODCTL_READ_TIMEOUT_MS"), defaults.read_timeout_ms),
        settle_delay_ms: parsed(var("PODCTL_SETTLE_DELAY_MS"), defaults.settle_delay_ms),
        connect_timeout_ms: parsed(var("PODCTL_CONNECT_TIMEOUT_MS"), defaults.connect_timeout_ms),
        reconcile_on_start: parsed(var("PODCTL_RECONCILE_ON_START"), defaults.reconcile_on_start),
    }
}

async fn handle_get_schedules(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.schedules().await)
}

async fn handle_post_schedules(
    State(state): State<AppState>,
    Json(update): Json<SchedulesUpdate>,
) -> impl IntoResponse {
    if let Err(err) = update.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let schedules = match state.store.update_schedules(&update).await {
        Ok(schedules) => schedules,
        Err(err) => {
            warn!("failed to persist schedule update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist schedules",
            );
        }
    };
    state.scheduler.reschedule().await;

    Json(schedules).into_response()
}

async fn handle_get_schedule_status(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.store.settings().await;
    let tz = settings.timezone();
    let now = Utc::now();
    let today = local_weekday(tz.unwrap_or(Tz::UTC), now);

    let mut sides = BTreeMap::new();
    for side in Side::ALL {
        let schedule = state.store.schedule_for_day(side, today).await;
        let evaluated = is_currently_running(Some(&schedule), tz, now).and_then(|running| {
            time_until_start(Some(&schedule), tz, now).map(|start| (running, start))
        });
        let (is_running, next_start) = match evaluated {
            Ok(result) => result,
            Err(err) => {
                warn!("failed to evaluate {side} schedule: {err}");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
            }
        };
        let countdown = next_start
            .as_ref()
            .map(|start| format_countdown(u32::from(start.minutes_until_start)));
        sides.insert(
            side,
            SideRunState {
                is_running,
                next_start,
                countdown,
            },
        );
    }

    Json(sides).into_response()
}

async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.settings().await)
}

async fn handle_post_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    if let Some(Some(zone)) = &update.time_zone {
        if zone.parse::<Tz>().is_err() {
            return error_response(StatusCode::BAD_REQUEST, "Invalid timezone value");
        }
    }
    if let Err(err) = update.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let settings = match state.store.update_settings(&update).await {
        Ok(settings) => settings,
        Err(err) => {
            warn!("failed to persist settings update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist settings",
            );
        }
    };
    state.scheduler.reschedule().await;

    Json(settings).into_response()
}

async fn handle_post_device_status(
    State(state): State<AppState>,
    Json(update): Json<DeviceStatusUpdate>,
) -> impl IntoResponse {
    match state.devices.update(&update).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!("device status update failed: {err:#}");
            error_response(device_error_status(&err), &err.to_string())
        }
    }
}

async fn handle_get_variables(State(state): State<AppState>) -> impl IntoResponse {
    match state.link.get_variables().await {
        Ok(variables) => Json(variables).into_response(),
        Err(err) => {
            warn!("failed to read device variables: {err:#}");
            error_response(transport_error_status(&err), &err.to_string())
        }
    }
}

async fn handle_get_server_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status.snapshot().await)
}

async fn handle_get_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.jobs().await)
}

fn device_error_status(err: &DeviceError) -> StatusCode {
    match err {
        DeviceError::AwayMode(_) => StatusCode::CONFLICT,
        DeviceError::Protocol(_) => StatusCode::BAD_REQUEST,
        DeviceError::Transport(err) => transport_error_status(err),
        DeviceError::Base(_) => StatusCode::BAD_GATEWAY,
    }
}

fn transport_error_status(err: &TransportError) -> StatusCode {
    match err {
        TransportError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        TransportError::NotConnected | TransportError::StreamEnded => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TransportError::Io(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
