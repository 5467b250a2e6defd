//! Application state shared across handlers.

use std::path::Path;
use std::sync::Arc;

use gattlink_core::{Config, SessionConfig, SessionHandle};
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;

use crate::view::{spawn_projector, SessionView, SharedView};

/// State handed to every handler.
pub type SharedState = Arc<AppState>;

/// The running session and its projection.
pub struct AppState {
    session: SessionHandle,
    view: SharedView,
    projector: JoinHandle<()>,
}

impl AppState {
    /// Wrap a running session and start projecting its events.
    #[must_use]
    pub fn new(session: SessionHandle) -> SharedState {
        let view = Arc::new(RwLock::new(SessionView::default()));
        let projector = spawn_projector(&session, Arc::clone(&view));
        Arc::new(Self {
            session,
            view,
            projector,
        })
    }

    /// The session command surface.
    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Get read access to the projected view.
    pub async fn view(&self) -> RwLockReadGuard<'_, SessionView> {
        self.view.read().await
    }

    /// Stop the session, then the projection.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        self.projector.abort();
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Load the configuration from `path`, or defaults when the file is absent.
///
/// # Errors
///
/// Returns a configuration error if an existing file cannot be parsed or
/// fails validation.
pub fn load_config(path: &Path) -> gattlink_core::Result<Config> {
    Ok(Config::load_or_default(path)?)
}

/// Open the BlueZ adapter and spawn a session on it.
///
/// # Errors
///
/// Returns an error if no adapter is available.
#[cfg(feature = "bluetooth")]
pub async fn open_session(config: SessionConfig) -> anyhow::Result<SessionHandle> {
    let (transport, events) = gattlink_core::BluezTransport::new().await?;
    Ok(gattlink_core::Session::spawn(transport, events, config))
}

/// Spawn a session on a simulated radio with a few demo peripherals.
///
/// # Errors
///
/// Never fails; the signature matches the hardware build.
#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
pub async fn open_session(config: SessionConfig) -> anyhow::Result<SessionHandle> {
    use gattlink_core::{MockDevice, MockService, MockTransport};
    use uuid::Uuid;

    const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);
    const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);
    const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);
    const HEART_RATE_MEASUREMENT: Uuid =
        Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

    tracing::warn!("built without bluetooth support, using simulated peripherals");
    let (transport, events) = MockTransport::scripted(vec![
        MockDevice::new("demo-hrm", Some("Demo Heart Rate"), -52).with_service(
            MockService::new(HEART_RATE_SERVICE, 1).with_characteristic(
                HEART_RATE_MEASUREMENT,
                2,
                vec![0x00, 0x48],
            ),
        ),
        MockDevice::new("demo-tag", Some("Demo Tag"), -71).with_service(
            MockService::new(BATTERY_SERVICE, 1).with_characteristic(BATTERY_LEVEL, 2, vec![93]),
        ),
        MockDevice::new("demo-anon", None, -88),
    ]);
    Ok(gattlink_core::Session::spawn(transport, events, config))
}
