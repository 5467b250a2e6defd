//! OpenAPI specification for the gattlink API.

use axum::Json;
use utoipa::OpenApi;

use super::characteristics::{NotifyRequest, WriteRequest};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::session::{
    CharacteristicSummary, CommandResponse, DeviceSummary, DevicesResponse,
    SessionErrorSummary, SessionResponse, ServiceSummary,
};

/// Serve the OpenAPI specification as JSON at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The specification as pretty JSON, for the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document for gattlink.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "gattlink API",
        version = "0.1.0",
        description = r#"
# gattlink API

Drives a single Bluetooth Low Energy central session: scan for peripherals,
connect to one, and work with its GATT characteristics.

## Model

Commands return as soon as they are queued. Their results, and anything the
radio reports on its own (link loss, weak signal, notifications), are folded
into the snapshot at `GET /api/session`.

- A connected link is polled for RSSI every few seconds; samples below the
  configured threshold report `WEAK_SIGNAL`.
- An unexpected disconnect schedules one reconnect to the last device.
  `POST /api/disconnect` turns that off until the next connect.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local gattlink server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "session", description = "Session snapshot"),
        (name = "scan", description = "Peripheral discovery"),
        (name = "connection", description = "Connect, disconnect and link RSSI"),
        (name = "characteristics", description = "GATT reads, writes and notifications"),
        (name = "lifecycle", description = "Host application foreground/background signals")
    ),
    paths(
        super::health::health_check,
        super::session::get_session,
        super::session::get_devices,
        super::session::start_scan,
        super::session::stop_scan,
        super::session::connect,
        super::session::disconnect,
        super::session::read_rssi,
        super::session::enter_background,
        super::session::enter_foreground,
        super::characteristics::read_characteristic,
        super::characteristics::write_characteristic,
        super::characteristics::set_notify,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            SessionResponse,
            SessionErrorSummary,
            DeviceSummary,
            DevicesResponse,
            ServiceSummary,
            CharacteristicSummary,
            CommandResponse,
            WriteRequest,
            NotifyRequest,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_lists_every_route() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "gattlink API");
        assert!(spec.paths.paths.contains_key("/api/connect/{device_id}"));
        assert!(spec
            .paths
            .paths
            .contains_key("/api/characteristics/{uuid}/write"));
        assert_eq!(spec.paths.paths.len(), 13);
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"gattlink API\""));
    }
}
