//! HTTP API routes and handlers.
//!
//! - `health` - Service health checks
//! - `session` - Session snapshot, scanning, connection and lifecycle
//! - `characteristics` - GATT reads, writes and notifications
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod characteristics;
pub mod error;
pub mod health;
pub mod openapi;
pub mod session;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// ```text
/// /health                           - Health check
/// /swagger-ui                       - Interactive documentation
/// /api
/// ├── /session                      - Session snapshot
/// ├── /devices                      - Scan results
/// ├── /scan/{start,stop}            - Discovery control
/// ├── /connect/{device_id}          - Connect to a scanned device
/// ├── /disconnect                   - Drop the link
/// ├── /rssi                         - Sample link RSSI
/// ├── /lifecycle/{background,foreground}
/// ├── /characteristics/{uuid}/{read,write,notify}
/// └── /openapi.json                 - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            session::router()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/characteristics", characteristics::router()),
        )
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
