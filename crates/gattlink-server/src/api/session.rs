//! Session endpoints: scanning, connection lifecycle and the session view.
//!
//! Commands are accepted immediately; their outcome shows up in
//! `GET /api/session` once the session reports it.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gattlink_core::{CharacteristicProperties, ConnectionState, DeviceId};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;
use crate::view::SessionView;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A device found by the current scan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "F1:22:9A:03:BC:7E",
    "name": "Heart Rate Strap",
    "rssi_dbm": -52
}))]
pub struct DeviceSummary {
    /// Stable device identifier; use it with `POST /api/connect/{device_id}`.
    #[schema(example = "F1:22:9A:03:BC:7E")]
    pub id: String,

    /// Advertised name, or `Unknown`.
    #[schema(example = "Heart Rate Strap")]
    pub name: String,

    /// Signal strength of the latest advertisement.
    #[schema(example = -52)]
    pub rssi_dbm: i16,
}

/// Devices response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    /// Scan results, strongest signal first.
    pub devices: Vec<DeviceSummary>,
}

/// A discovered service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceSummary {
    /// Service UUID.
    pub uuid: String,
    /// Whether it is a primary service.
    pub primary: bool,
}

/// A discovered characteristic with its latest known value.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CharacteristicSummary {
    /// Characteristic UUID.
    pub uuid: String,
    /// UUID of the owning service.
    pub service_uuid: String,
    /// Supported operations.
    pub properties: CharacteristicProperties,
    /// Whether notifications are on.
    pub notifying: bool,
    /// Latest value as lowercase hex.
    #[schema(example = "0048", nullable)]
    pub value_hex: Option<String>,
    /// When the value arrived.
    #[schema(nullable)]
    pub value_updated_at_utc: Option<String>,
}

/// Last reported session error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionErrorSummary {
    /// Machine-readable code.
    #[schema(example = "WEAK_SIGNAL")]
    pub code: String,
    /// Display message.
    #[schema(example = "Weak Bluetooth signal (-90dBm)")]
    pub message: String,
    /// `true` for signals that leave the link up (timeout, weak signal).
    pub advisory: bool,
    /// When it was reported.
    pub at_utc: String,
}

/// Full session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// Connection state.
    pub state: ConnectionState,
    /// Handle token of the connected peripheral.
    #[schema(nullable)]
    pub peripheral: Option<String>,
    /// Latest link RSSI.
    #[schema(nullable)]
    pub rssi_dbm: Option<i16>,
    /// Most recent error.
    #[schema(nullable)]
    pub last_error: Option<SessionErrorSummary>,
    /// Scan results.
    pub devices: Vec<DeviceSummary>,
    /// Services of the connected peripheral.
    pub services: Vec<ServiceSummary>,
    /// Characteristics of the connected peripheral.
    pub characteristics: Vec<CharacteristicSummary>,
}

/// Acknowledgement for a queued command.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "accepted": true, "state": "scanning" }))]
pub struct CommandResponse {
    /// Always `true`; failures are reported as errors.
    pub accepted: bool,
    /// Connection state when the command was queued.
    pub state: ConnectionState,
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn devices(view: &SessionView) -> Vec<DeviceSummary> {
    view.devices
        .iter()
        .map(|d| DeviceSummary {
            id: d.id.to_string(),
            name: d.name.clone(),
            rssi_dbm: d.rssi,
        })
        .collect()
}

impl From<&SessionView> for SessionResponse {
    fn from(view: &SessionView) -> Self {
        let characteristics = view
            .characteristics
            .values()
            .map(|c| {
                let snapshot = view.values.get(&c.uuid);
                CharacteristicSummary {
                    uuid: c.uuid.to_string(),
                    service_uuid: c.service_uuid.to_string(),
                    properties: c.properties,
                    notifying: view.notifying.get(&c.uuid).copied().unwrap_or(false),
                    value_hex: snapshot.and_then(|s| s.value.as_deref()).map(hex::encode),
                    value_updated_at_utc: snapshot.map(|s| rfc3339(s.updated_at)),
                }
            })
            .collect();

        Self {
            state: view.state,
            peripheral: view.peripheral.as_ref().map(|p| p.token().to_string()),
            rssi_dbm: view.rssi,
            last_error: view.last_error.as_ref().map(|e| SessionErrorSummary {
                code: e.code.to_string(),
                message: e.message.clone(),
                advisory: e.advisory,
                at_utc: rfc3339(e.at),
            }),
            devices: devices(view),
            services: view
                .services
                .iter()
                .map(|s| ServiceSummary {
                    uuid: s.uuid.to_string(),
                    primary: s.primary,
                })
                .collect(),
            characteristics,
        }
    }
}

pub(crate) fn accepted(state: &SharedState) -> Json<CommandResponse> {
    Json(CommandResponse {
        accepted: true,
        state: state.session().state(),
    })
}

// ============================================================================
// Router
// ============================================================================

/// Routes mounted under `/api`.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/devices", get(get_devices))
        .route("/scan/start", post(start_scan))
        .route("/scan/stop", post(stop_scan))
        .route("/connect/{device_id}", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/rssi", post(read_rssi))
        .route("/lifecycle/background", post(enter_background))
        .route("/lifecycle/foreground", post(enter_foreground))
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current session snapshot.
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get session state",
    description = "Returns the connection state, scan results, link RSSI, the last error, \
        and the services and characteristics of the connected peripheral.",
    responses(
        (status = 200, description = "Session snapshot", body = SessionResponse)
    )
)]
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionResponse> {
    let view = state.view().await;
    Json(SessionResponse::from(&*view))
}

/// List devices found by the current scan.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "scan",
    operation_id = "getDevices",
    summary = "List scanned devices",
    description = "Devices seen since the last scan started, strongest signal first.",
    responses(
        (status = 200, description = "Scan results", body = DevicesResponse)
    )
)]
pub async fn get_devices(State(state): State<SharedState>) -> Json<DevicesResponse> {
    let view = state.view().await;
    Json(DevicesResponse {
        devices: devices(&view),
    })
}

/// Start scanning.
#[utoipa::path(
    post,
    path = "/api/scan/start",
    tag = "scan",
    operation_id = "startScan",
    summary = "Start scanning",
    description = "Clears the device list and starts discovery. If the radio is off the \
        session reports RADIO_UNAVAILABLE in `last_error`.",
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 503, description = "Session stopped", body = ErrorResponse)
    )
)]
pub async fn start_scan(State(state): State<SharedState>) -> ApiResult<Json<CommandResponse>> {
    state.session().start_scan()?;
    Ok(accepted(&state))
}

/// Stop scanning.
#[utoipa::path(
    post,
    path = "/api/scan/stop",
    tag = "scan",
    operation_id = "stopScan",
    summary = "Stop scanning",
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 503, description = "Session stopped", body = ErrorResponse)
    )
)]
pub async fn stop_scan(State(state): State<SharedState>) -> ApiResult<Json<CommandResponse>> {
    state.session().stop_scan()?;
    Ok(accepted(&state))
}

/// Connect to a scanned device.
#[utoipa::path(
    post,
    path = "/api/connect/{device_id}",
    tag = "connection",
    operation_id = "connect",
    summary = "Connect to a device",
    description = "Connects to a device from the current scan results and makes it the \
        auto-reconnect target.",
    params(
        ("device_id" = String, Path, description = "Device id from `GET /api/devices`")
    ),
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 404, description = "Device not in scan results", body = ErrorResponse),
        (status = 503, description = "Session stopped", body = ErrorResponse)
    )
)]
pub async fn connect(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<CommandResponse>> {
    let device = state
        .view()
        .await
        .device(&DeviceId::new(device_id.as_str()))
        .cloned()
        .ok_or_else(|| ApiError::NotFound {
            error_code: "device_not_found".to_string(),
            message: format!("Device {device_id} is not in the current scan results"),
        })?;

    info!(device = %device.id, "connect requested over HTTP");
    state.session().connect(device)?;
    Ok(accepted(&state))
}

/// Disconnect the active peripheral.
#[utoipa::path(
    post,
    path = "/api/disconnect",
    tag = "connection",
    operation_id = "disconnect",
    summary = "Disconnect",
    description = "Drops the link and disables auto-reconnect.",
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 503, description = "Session stopped", body = ErrorResponse)
    )
)]
pub async fn disconnect(State(state): State<SharedState>) -> ApiResult<Json<CommandResponse>> {
    state.session().disconnect()?;
    Ok(accepted(&state))
}

/// Sample the link RSSI once.
#[utoipa::path(
    post,
    path = "/api/rssi",
    tag = "connection",
    operation_id = "readRssi",
    summary = "Read link RSSI",
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 409, description = "Not connected", body = ErrorResponse),
        (status = 503, description = "Session stopped", body = ErrorResponse)
    )
)]
pub async fn read_rssi(State(state): State<SharedState>) -> ApiResult<Json<CommandResponse>> {
    let current = state.session().state();
    if current != ConnectionState::Connected {
        return Err(ApiError::not_connected(current));
    }
    state.session().read_rssi()?;
    Ok(accepted(&state))
}

/// Report that the host application went to the background.
#[utoipa::path(
    post,
    path = "/api/lifecycle/background",
    tag = "lifecycle",
    operation_id = "enterBackground",
    summary = "Enter background",
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 503, description = "Session stopped", body = ErrorResponse)
    )
)]
pub async fn enter_background(
    State(state): State<SharedState>,
) -> ApiResult<Json<CommandResponse>> {
    state.session().enter_background()?;
    Ok(accepted(&state))
}

/// Report that the host application returned to the foreground.
#[utoipa::path(
    post,
    path = "/api/lifecycle/foreground",
    tag = "lifecycle",
    operation_id = "enterForeground",
    summary = "Enter foreground",
    description = "Reconnects the last device if a link was up when the app went to the \
        background.",
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 503, description = "Session stopped", body = ErrorResponse)
    )
)]
pub async fn enter_foreground(
    State(state): State<SharedState>,
) -> ApiResult<Json<CommandResponse>> {
    state.session().enter_foreground()?;
    Ok(accepted(&state))
}
