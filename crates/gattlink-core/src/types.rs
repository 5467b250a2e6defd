//! Shared value types for the BLE session.
//!
//! Identifiers here are deliberately opaque: a [`DeviceId`] is the stable
//! identity of an advertising peripheral, a [`PeripheralHandle`] is the
//! token the transport hands back to address that peripheral on the radio.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Name reported for peripherals that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Stable identity of a discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a transport-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque transport reference to a peripheral.
///
/// Cheap to clone; two handles are equal when the transport issued the
/// same token for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralHandle(Arc<str>);

impl PeripheralHandle {
    /// Create a handle from a transport token.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// The transport token behind this handle.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable identity; the registry key.
    pub id: DeviceId,
    /// Advertised name, or [`UNKNOWN_DEVICE_NAME`].
    pub name: String,
    /// Signal strength of the latest sighting in dBm.
    pub rssi: i16,
    /// Transport reference used to connect.
    pub handle: PeripheralHandle,
}

impl Device {
    /// Build a device from an advertisement, defaulting absent or empty names.
    pub fn new(id: DeviceId, name: Option<String>, rssi: i16, handle: PeripheralHandle) -> Self {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
        Self {
            id,
            name,
            rssi,
            handle,
        }
    }
}

/// Lifecycle state of the session. Owned by the controller.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Discovery is running.
    Scanning,
    /// A connect request is outstanding.
    Connecting,
    /// A peripheral is connected.
    Connected,
    /// The link went down (or the radio did).
    Disconnected,
}

impl ConnectionState {
    /// Lowercase label used in logs and API payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power state of the local radio as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    /// Ready for scanning and connections.
    PoweredOn,
    /// Switched off by the user or the system.
    PoweredOff,
    /// The stack is restarting; all links are gone.
    Resetting,
    /// Unsupported, unauthorized or not yet known.
    Other,
}

/// How a characteristic write is acknowledged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Write request; the peripheral confirms.
    #[default]
    WithResponse,
    /// Write command; no confirmation is delivered.
    WithoutResponse,
}

/// A GATT service discovered on the connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    /// Protocol-defined identifier.
    pub uuid: Uuid,
    /// Transport attribute handle.
    pub handle: u16,
    /// Whether this is a primary service.
    pub primary: bool,
}

/// Operations a characteristic advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[allow(clippy::struct_excessive_bools)]
pub struct CharacteristicProperties {
    /// Readable.
    pub read: bool,
    /// Writable with response.
    pub write: bool,
    /// Writable without response.
    pub write_without_response: bool,
    /// Supports notifications.
    pub notify: bool,
    /// Supports indications.
    pub indicate: bool,
}

/// A GATT characteristic discovered on the connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    /// Protocol-defined identifier.
    pub uuid: Uuid,
    /// Transport attribute handle.
    pub handle: u16,
    /// Identifier of the owning service.
    pub service_uuid: Uuid,
    /// Attribute handle of the owning service.
    pub service_handle: u16,
    /// Supported operations.
    pub properties: CharacteristicProperties,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name_defaults_to_unknown() {
        let handle = PeripheralHandle::new("hci0/AA");
        let device = Device::new(DeviceId::new("AA"), None, -40, handle.clone());
        assert_eq!(device.name, UNKNOWN_DEVICE_NAME);

        let device = Device::new(DeviceId::new("AA"), Some("  ".into()), -40, handle);
        assert_eq!(device.name, UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn test_device_keeps_advertised_name() {
        let device = Device::new(
            DeviceId::new("AA"),
            Some("Heart Rate".into()),
            -40,
            PeripheralHandle::new("AA"),
        );
        assert_eq!(device.name, "Heart Rate");
    }

    #[test]
    fn test_connection_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Connecting).unwrap();
        assert_eq!(json, "\"connecting\"");
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_peripheral_handle_equality() {
        assert_eq!(PeripheralHandle::new("x"), PeripheralHandle::new("x"));
        assert_ne!(PeripheralHandle::new("x"), PeripheralHandle::new("y"));
    }
}
