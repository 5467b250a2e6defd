//! Characteristic endpoints: read, write and notification control.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use gattlink_core::{ConnectionState, WriteMode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::api::session::{accepted, CommandResponse};
use crate::state::SharedState;

/// Write request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "value_hex": "01", "mode": "with_response" }))]
pub struct WriteRequest {
    /// Bytes to write as hex, e.g. `0a1b`.
    #[schema(example = "01")]
    pub value_hex: String,

    /// Acknowledgement mode; defaults to `with_response`.
    #[serde(default)]
    pub mode: WriteMode,
}

/// Notification toggle body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "enabled": true }))]
pub struct NotifyRequest {
    /// Desired notification state.
    pub enabled: bool,
}

/// Routes mounted under `/api/characteristics`.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/{uuid}/read", post(read_characteristic))
        .route("/{uuid}/write", post(write_characteristic))
        .route("/{uuid}/notify", post(set_notify))
}

/// Validate that `raw` names a characteristic of the connected peripheral.
async fn resolve(state: &SharedState, raw: &str) -> ApiResult<Uuid> {
    let uuid = Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest {
        error_code: "invalid_uuid".to_string(),
        message: format!("'{raw}' is not a UUID"),
    })?;

    let view = state.view().await;
    if view.state != ConnectionState::Connected {
        return Err(ApiError::not_connected(view.state));
    }
    if !view.characteristics.contains_key(&uuid) {
        return Err(ApiError::NotFound {
            error_code: "characteristic_not_found".to_string(),
            message: format!("Characteristic {uuid} is not known on the connected peripheral"),
        });
    }
    Ok(uuid)
}

/// Read a characteristic.
#[utoipa::path(
    post,
    path = "/api/characteristics/{uuid}/read",
    tag = "characteristics",
    operation_id = "readCharacteristic",
    summary = "Read a characteristic",
    description = "Queues a read. The value appears in `GET /api/session` once the \
        peripheral answers.",
    params(("uuid" = String, Path, description = "Characteristic UUID")),
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 400, description = "Malformed UUID", body = ErrorResponse),
        (status = 404, description = "Unknown characteristic", body = ErrorResponse),
        (status = 409, description = "Not connected", body = ErrorResponse)
    )
)]
pub async fn read_characteristic(
    State(state): State<SharedState>,
    Path(uuid): Path<String>,
) -> ApiResult<Json<CommandResponse>> {
    let uuid = resolve(&state, &uuid).await?;
    state.session().read_characteristic(uuid)?;
    Ok(accepted(&state))
}

/// Write a characteristic.
#[utoipa::path(
    post,
    path = "/api/characteristics/{uuid}/write",
    tag = "characteristics",
    operation_id = "writeCharacteristic",
    summary = "Write a characteristic",
    params(("uuid" = String, Path, description = "Characteristic UUID")),
    request_body = WriteRequest,
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 400, description = "Malformed UUID or value", body = ErrorResponse),
        (status = 404, description = "Unknown characteristic", body = ErrorResponse),
        (status = 409, description = "Not connected", body = ErrorResponse)
    )
)]
pub async fn write_characteristic(
    State(state): State<SharedState>,
    Path(uuid): Path<String>,
    Json(request): Json<WriteRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let value = hex::decode(request.value_hex.trim()).map_err(|e| ApiError::BadRequest {
        error_code: "invalid_value".to_string(),
        message: format!("value_hex is not valid hex: {e}"),
    })?;
    let uuid = resolve(&state, &uuid).await?;
    state
        .session()
        .write_characteristic(uuid, value, request.mode)?;
    Ok(accepted(&state))
}

/// Enable or disable notifications.
#[utoipa::path(
    post,
    path = "/api/characteristics/{uuid}/notify",
    tag = "characteristics",
    operation_id = "setNotify",
    summary = "Toggle notifications",
    params(("uuid" = String, Path, description = "Characteristic UUID")),
    request_body = NotifyRequest,
    responses(
        (status = 200, description = "Command queued", body = CommandResponse),
        (status = 400, description = "Malformed UUID", body = ErrorResponse),
        (status = 404, description = "Unknown characteristic", body = ErrorResponse),
        (status = 409, description = "Not connected", body = ErrorResponse)
    )
)]
pub async fn set_notify(
    State(state): State<SharedState>,
    Path(uuid): Path<String>,
    Json(request): Json<NotifyRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let uuid = resolve(&state, &uuid).await?;
    state.session().set_notify(uuid, request.enabled)?;
    Ok(accepted(&state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode_defaults_to_with_response() {
        let request: WriteRequest = serde_json::from_str(r#"{"value_hex":"01"}"#).unwrap();
        assert_eq!(request.mode, WriteMode::WithResponse);
    }
}
