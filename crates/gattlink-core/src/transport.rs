//! The BLE transport capability the session drives.
//!
//! A [`Transport`] accepts requests and returns immediately. Every result
//! comes back later as a [`TransportEvent`] on the channel created
//! alongside the transport, in the order the radio stack produced them.
//!
//! Backends:
//!
//! - [`bluez`] (feature `bluetooth`) drives a local BlueZ adapter via `bluer`.
//! - [`mock`] (tests, feature `mock-bluetooth`, or builds without `bluetooth`)
//!   records requests and can play a scripted set of peripherals.

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{
    Characteristic, DeviceId, PeripheralHandle, RadioState, Service, WriteMode,
};

#[cfg(feature = "bluetooth")]
pub mod bluez;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub mod mock;

/// Receiving side of a transport's event channel.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending side of a transport's event channel.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// An error reported by the platform stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Wrap a platform message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Placeholder for failures the platform did not explain.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("Unknown Bluetooth error")
    }

    /// The platform message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Options for a connect request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Ask the stack to report the disconnect even when the app is suspended.
    pub notify_on_disconnect: bool,
}

/// Asynchronous results and notifications from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The local radio changed power state.
    RadioStateChanged(RadioState),

    /// A peripheral advertised while discovery was running.
    Advertisement {
        /// Stable identity.
        id: DeviceId,
        /// Advertised name, if any.
        name: Option<String>,
        /// Signal strength in dBm.
        rssi: i16,
        /// Handle to connect with.
        handle: PeripheralHandle,
    },

    /// Discovery could not be started or stopped unexpectedly.
    DiscoveryFailed(TransportError),

    /// A connect request succeeded.
    Connected(PeripheralHandle),

    /// A connect request failed.
    ConnectFailed {
        /// Target of the attempt.
        peripheral: PeripheralHandle,
        /// Platform reason, if given.
        cause: Option<TransportError>,
    },

    /// A link went down. `cause` is `None` for requested disconnects.
    Disconnected {
        /// The peripheral that went away.
        peripheral: PeripheralHandle,
        /// Reason for an unexpected loss.
        cause: Option<TransportError>,
    },

    /// Service discovery completed.
    ServicesDiscovered {
        /// Peripheral queried.
        peripheral: PeripheralHandle,
        /// Discovered services or the failure.
        result: Result<Vec<Service>, TransportError>,
    },

    /// Characteristic discovery for one service completed.
    CharacteristicsDiscovered {
        /// Peripheral queried.
        peripheral: PeripheralHandle,
        /// Service the characteristics belong to.
        service: Service,
        /// Discovered characteristics or the failure.
        result: Result<Vec<Characteristic>, TransportError>,
    },

    /// A read completed or a notification arrived.
    ValueUpdated {
        /// Source characteristic.
        characteristic: Characteristic,
        /// New value or the failure.
        result: Result<Option<Vec<u8>>, TransportError>,
    },

    /// A write with response was confirmed (or rejected).
    ValueWritten {
        /// Target characteristic.
        characteristic: Characteristic,
        /// Rejection reason, if any.
        error: Option<TransportError>,
    },

    /// Notifications were switched on or off (or the switch failed).
    NotificationStateChanged {
        /// Target characteristic.
        characteristic: Characteristic,
        /// Requested state.
        enabled: bool,
        /// Failure reason, if any.
        error: Option<TransportError>,
    },

    /// An RSSI read on the connected link completed.
    RssiRead {
        /// Peripheral sampled.
        peripheral: PeripheralHandle,
        /// RSSI in dBm or the failure.
        result: Result<i16, TransportError>,
    },
}

/// Central-role BLE primitives.
///
/// Implementations must not block: each request is issued and its outcome
/// reported as a [`TransportEvent`].
pub trait Transport: Send + Sync + 'static {
    /// Current power state of the radio.
    fn radio_state(&self) -> RadioState;

    /// Start discovering peripherals.
    fn start_discovery(&self, allow_duplicates: bool);

    /// Stop discovery. No-op when not discovering.
    fn stop_discovery(&self);

    /// Connect to a peripheral.
    fn connect(&self, peripheral: &PeripheralHandle, options: ConnectOptions);

    /// Tear down a link or abandon a pending connect.
    fn cancel_connection(&self, peripheral: &PeripheralHandle);

    /// Discover services, optionally restricted to `filter`.
    fn discover_services(&self, peripheral: &PeripheralHandle, filter: Option<&[Uuid]>);

    /// Discover characteristics of `service`, optionally restricted to `filter`.
    fn discover_characteristics(
        &self,
        peripheral: &PeripheralHandle,
        service: &Service,
        filter: Option<&[Uuid]>,
    );

    /// Read a characteristic value.
    fn read_value(&self, peripheral: &PeripheralHandle, characteristic: &Characteristic);

    /// Write a characteristic value.
    fn write_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        value: &[u8],
        mode: WriteMode,
    );

    /// Enable or disable notifications.
    fn set_notify(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        enabled: bool,
    );

    /// Read the RSSI of the connected link.
    fn read_rssi(&self, peripheral: &PeripheralHandle);
}
