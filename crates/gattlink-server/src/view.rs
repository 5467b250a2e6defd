//! Observer-side projection of the session.
//!
//! A [`SessionView`] is folded from [`SessionEvent`]s by a background task
//! and read by the HTTP handlers. It never drives the session; commands
//! go through the [`SessionHandle`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gattlink_core::{
    Characteristic, ConnectionState, Device, DeviceId, PeripheralHandle, Service, SessionEvent,
    SessionHandle,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// A shared, lock-protected view.
pub type SharedView = Arc<RwLock<SessionView>>;

/// Latest known value of a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSnapshot {
    /// Raw bytes, `None` when the peripheral reported an empty value.
    pub value: Option<Vec<u8>>,
    /// When the value arrived.
    pub updated_at: DateTime<Utc>,
}

/// Last error shown to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSnapshot {
    /// Machine-readable code.
    pub code: &'static str,
    /// Display message.
    pub message: String,
    /// Whether the link was left untouched.
    pub advisory: bool,
    /// When it was reported.
    pub at: DateTime<Utc>,
}

/// Everything a client needs to render the session.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    /// Devices from the current scan, strongest first.
    pub devices: Vec<Device>,
    /// Connection state.
    pub state: ConnectionState,
    /// Connected peripheral.
    pub peripheral: Option<PeripheralHandle>,
    /// Latest link RSSI.
    pub rssi: Option<i16>,
    /// Most recent error.
    pub last_error: Option<ErrorSnapshot>,
    /// Services of the connected peripheral.
    pub services: Vec<Service>,
    /// Characteristics of the connected peripheral, keyed by UUID.
    pub characteristics: BTreeMap<Uuid, Characteristic>,
    /// Characteristics with notifications on.
    pub notifying: BTreeMap<Uuid, bool>,
    /// Last value per characteristic.
    pub values: BTreeMap<Uuid, ValueSnapshot>,
}

impl SessionView {
    /// Look up a scanned device.
    #[must_use]
    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.id == id)
    }

    /// Fold one event into the view.
    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::DevicesUpdated(devices) => self.devices = devices,
            SessionEvent::StateChanged(state) => self.state = state,
            SessionEvent::Connected(peripheral) => {
                self.clear_link();
                self.peripheral = Some(peripheral);
                self.last_error = None;
            }
            SessionEvent::Disconnected { .. } => {
                self.clear_link();
            }
            SessionEvent::ServicesDiscovered(services) => self.services = services,
            SessionEvent::CharacteristicsDiscovered {
                characteristics, ..
            } => {
                for characteristic in characteristics {
                    self.characteristics
                        .insert(characteristic.uuid, characteristic);
                }
            }
            SessionEvent::ValueUpdated {
                characteristic,
                value,
            } => {
                self.values.insert(
                    characteristic.uuid,
                    ValueSnapshot {
                        value,
                        updated_at: Utc::now(),
                    },
                );
            }
            SessionEvent::ValueWritten(characteristic) => {
                debug!(uuid = %characteristic.uuid, "write confirmed");
            }
            SessionEvent::NotificationStateChanged {
                characteristic,
                enabled,
            } => {
                self.notifying.insert(characteristic.uuid, enabled);
            }
            SessionEvent::RssiUpdated(rssi) => self.rssi = Some(rssi),
            SessionEvent::Error(error) => {
                self.last_error = Some(ErrorSnapshot {
                    code: error.error_code(),
                    message: error.to_string(),
                    advisory: error.is_advisory(),
                    at: Utc::now(),
                });
            }
        }
    }

    fn clear_link(&mut self) {
        self.peripheral = None;
        self.rssi = None;
        self.services.clear();
        self.characteristics.clear();
        self.notifying.clear();
        self.values.clear();
    }
}

/// Keep `view` in sync with the session until the session stops.
pub fn spawn_projector(session: &SessionHandle, view: SharedView) -> JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => view.write().await.apply(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "view projection lagged behind the session");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("view projection stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_core::{CharacteristicProperties, SessionError};

    fn device(id: &str, rssi: i16) -> Device {
        Device::new(
            DeviceId::new(id),
            None,
            rssi,
            PeripheralHandle::new(format!("mock:{id}")),
        )
    }

    fn characteristic() -> Characteristic {
        Characteristic {
            uuid: Uuid::from_u128(0x2a19),
            handle: 3,
            service_uuid: Uuid::from_u128(0x180f),
            service_handle: 1,
            properties: CharacteristicProperties::default(),
        }
    }

    #[test]
    fn test_empty_device_list_replaces_previous_scan() {
        let mut view = SessionView::default();
        view.apply(SessionEvent::DevicesUpdated(vec![device("a", -40)]));
        assert_eq!(view.devices.len(), 1);

        view.apply(SessionEvent::StateChanged(ConnectionState::Scanning));
        assert_eq!(view.devices.len(), 1);
        view.apply(SessionEvent::DevicesUpdated(Vec::new()));
        assert!(view.devices.is_empty());
    }

    #[test]
    fn test_disconnect_drops_link_details() {
        let mut view = SessionView::default();
        view.apply(SessionEvent::Connected(PeripheralHandle::new("mock:a")));
        view.apply(SessionEvent::CharacteristicsDiscovered {
            service: Service {
                uuid: Uuid::from_u128(0x180f),
                handle: 1,
                primary: true,
            },
            characteristics: vec![characteristic()],
        });
        view.apply(SessionEvent::ValueUpdated {
            characteristic: characteristic(),
            value: Some(vec![90]),
        });
        view.apply(SessionEvent::RssiUpdated(-60));
        assert_eq!(view.values.len(), 1);

        view.apply(SessionEvent::Disconnected {
            peripheral: PeripheralHandle::new("mock:a"),
            cause: None,
        });

        assert!(view.peripheral.is_none());
        assert!(view.rssi.is_none());
        assert!(view.characteristics.is_empty());
        assert!(view.values.is_empty());
    }

    #[test]
    fn test_errors_are_kept_until_next_connection() {
        let mut view = SessionView::default();
        view.apply(SessionEvent::Error(SessionError::WeakSignal { rssi: -90 }));

        let error = view.last_error.clone().unwrap();
        assert_eq!(error.code, "WEAK_SIGNAL");
        assert_eq!(error.message, "Weak Bluetooth signal (-90dBm)");
        assert!(error.advisory);

        view.apply(SessionEvent::Error(SessionError::RadioOff));
        assert!(!view.last_error.as_ref().unwrap().advisory);

        view.apply(SessionEvent::Connected(PeripheralHandle::new("mock:a")));
        assert!(view.last_error.is_none());
    }
}
