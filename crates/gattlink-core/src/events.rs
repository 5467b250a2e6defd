//! Observer contract of a session.
//!
//! Observers subscribe to a broadcast of [`SessionEvent`]s. Having no
//! subscriber is a normal state: events are then dropped.

use tokio::sync::broadcast;

use crate::error::SessionError;
use crate::transport::TransportError;
use crate::types::{Characteristic, ConnectionState, Device, PeripheralHandle, Service};

/// Everything a session tells its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The scan registry changed; devices are sorted by descending RSSI.
    DevicesUpdated(Vec<Device>),

    /// The connection state changed.
    StateChanged(ConnectionState),

    /// A peripheral connected.
    Connected(PeripheralHandle),

    /// A peripheral disconnected, with the cause when unexpected.
    Disconnected {
        /// The peripheral that went away.
        peripheral: PeripheralHandle,
        /// Reason for an unexpected loss.
        cause: Option<TransportError>,
    },

    /// Services of the connected peripheral were discovered.
    ServicesDiscovered(Vec<Service>),

    /// Characteristics of one service were discovered.
    CharacteristicsDiscovered {
        /// Owning service.
        service: Service,
        /// Its characteristics.
        characteristics: Vec<Characteristic>,
    },

    /// A characteristic was read or notified.
    ValueUpdated {
        /// Source characteristic.
        characteristic: Characteristic,
        /// Value bytes, if the stack delivered any.
        value: Option<Vec<u8>>,
    },

    /// A write with response was confirmed.
    ValueWritten(Characteristic),

    /// Notifications were switched on or off.
    NotificationStateChanged {
        /// Target characteristic.
        characteristic: Characteristic,
        /// New state.
        enabled: bool,
    },

    /// A fresh RSSI sample of the connected link.
    RssiUpdated(i16),

    /// An asynchronous failure.
    Error(SessionError),
}

/// Publishing side of the observer broadcast.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventPublisher {
    /// Create a publisher buffering up to `capacity` events per slow observer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attach a new observer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver an event to every observer.
    pub fn publish(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no observers attached, event dropped");
        }
    }
}
