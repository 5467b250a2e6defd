//! In-memory transport for tests and hardware-free runs.
//!
//! Every request is recorded as a [`TransportCall`]. A transport built with
//! [`MockTransport::new`] stays silent so tests can inject exactly the
//! events they want; one built with [`MockTransport::scripted`] answers
//! requests from its [`MockDevice`] list the way a cooperative radio would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    ConnectOptions, Transport, TransportError, TransportEvent, TransportEventSender,
    TransportEvents,
};
use crate::types::{
    Characteristic, CharacteristicProperties, DeviceId, PeripheralHandle, RadioState, Service,
    WriteMode,
};

/// A request the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `start_discovery`
    StartDiscovery {
        /// Duplicate reporting requested.
        allow_duplicates: bool,
    },
    /// `stop_discovery`
    StopDiscovery,
    /// `connect`
    Connect {
        /// Target.
        peripheral: PeripheralHandle,
        /// Options passed.
        options: ConnectOptions,
    },
    /// `cancel_connection`
    CancelConnection(PeripheralHandle),
    /// `discover_services`
    DiscoverServices(PeripheralHandle),
    /// `discover_characteristics`
    DiscoverCharacteristics {
        /// Target.
        peripheral: PeripheralHandle,
        /// Service queried.
        service: Uuid,
    },
    /// `read_value`
    ReadValue(Uuid),
    /// `write_value`
    WriteValue {
        /// Target characteristic.
        characteristic: Uuid,
        /// Bytes written.
        value: Vec<u8>,
        /// Write mode.
        mode: WriteMode,
    },
    /// `set_notify`
    SetNotify {
        /// Target characteristic.
        characteristic: Uuid,
        /// Requested state.
        enabled: bool,
    },
    /// `read_rssi`
    ReadRssi(PeripheralHandle),
}

/// A GATT service exposed by a [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockService {
    /// The service.
    pub service: Service,
    /// Its characteristics with their initial values.
    pub characteristics: Vec<(Characteristic, Vec<u8>)>,
}

impl MockService {
    /// A primary service with no characteristics.
    #[must_use]
    pub fn new(uuid: Uuid, handle: u16) -> Self {
        Self {
            service: Service {
                uuid,
                handle,
                primary: true,
            },
            characteristics: Vec::new(),
        }
    }

    /// Add a readable, writable, notifying characteristic with an initial value.
    #[must_use]
    pub fn with_characteristic(mut self, uuid: Uuid, handle: u16, value: Vec<u8>) -> Self {
        let characteristic = Characteristic {
            uuid,
            handle,
            service_uuid: self.service.uuid,
            service_handle: self.service.handle,
            properties: CharacteristicProperties {
                read: true,
                write: true,
                write_without_response: true,
                notify: true,
                indicate: false,
            },
        };
        self.characteristics.push((characteristic, value));
        self
    }
}

/// A simulated peripheral.
#[derive(Debug, Clone)]
pub struct MockDevice {
    /// Stable identity.
    pub id: DeviceId,
    /// Advertised name.
    pub name: Option<String>,
    /// RSSI reported by advertisements and link reads.
    pub rssi: i16,
    /// GATT database.
    pub services: Vec<MockService>,
}

impl MockDevice {
    /// A device without services.
    pub fn new(id: impl Into<DeviceId>, name: Option<&str>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            rssi,
            services: Vec::new(),
        }
    }

    /// Add a service.
    #[must_use]
    pub fn with_service(mut self, service: MockService) -> Self {
        self.services.push(service);
        self
    }

    /// The handle the mock issues for this device.
    #[must_use]
    pub fn handle(&self) -> PeripheralHandle {
        MockTransport::handle_for(&self.id)
    }
}

#[derive(Debug)]
struct MockState {
    radio: RadioState,
    scripted: bool,
    calls: Vec<TransportCall>,
    devices: Vec<MockDevice>,
    values: HashMap<Uuid, Vec<u8>>,
}

/// Recording, optionally self-answering transport.
///
/// Clones share state, so a test can keep one clone to inspect calls and
/// drive events while the session owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: TransportEventSender,
}

impl MockTransport {
    /// A silent mock with the radio powered on.
    #[must_use]
    pub fn new() -> (Self, TransportEvents) {
        Self::build(Vec::new(), false)
    }

    /// A mock that answers requests from `devices`.
    #[must_use]
    pub fn scripted(devices: Vec<MockDevice>) -> (Self, TransportEvents) {
        Self::build(devices, true)
    }

    fn build(devices: Vec<MockDevice>, scripted: bool) -> (Self, TransportEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let values = devices
            .iter()
            .flat_map(|d| d.services.iter())
            .flat_map(|s| s.characteristics.iter())
            .map(|(c, v)| (c.uuid, v.clone()))
            .collect();
        let state = MockState {
            radio: RadioState::PoweredOn,
            scripted,
            calls: Vec::new(),
            devices,
            values,
        };
        (
            Self {
                state: Arc::new(Mutex::new(state)),
                events,
            },
            rx,
        )
    }

    /// The handle issued for a device id.
    #[must_use]
    pub fn handle_for(id: &DeviceId) -> PeripheralHandle {
        PeripheralHandle::new(format!("mock:{id}"))
    }

    /// Every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Drain the recorded requests.
    #[must_use]
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut self.lock().calls)
    }

    /// Change the radio state and report it.
    pub fn set_radio_state(&self, radio: RadioState) {
        self.lock().radio = radio;
        self.emit(TransportEvent::RadioStateChanged(radio));
    }

    /// Change a device's RSSI for later advertisements and link reads.
    pub fn set_rssi(&self, id: &DeviceId, rssi: i16) {
        if let Some(device) = self.lock().devices.iter_mut().find(|d| &d.id == id) {
            device.rssi = rssi;
        }
    }

    /// Simulate an unexpected link loss.
    pub fn drop_link(&self, peripheral: &PeripheralHandle, reason: &str) {
        self.emit(TransportEvent::Disconnected {
            peripheral: peripheral.clone(),
            cause: Some(TransportError::new(reason)),
        });
    }

    /// Push an event as if the stack produced it.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call`; returns the state guard only when the mock is scripted.
    fn record(&self, call: TransportCall) -> Option<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.calls.push(call);
        state.scripted.then_some(state)
    }

    fn device<'a>(state: &'a MockState, peripheral: &PeripheralHandle) -> Option<&'a MockDevice> {
        state.devices.iter().find(|d| &d.handle() == peripheral)
    }
}

impl Transport for MockTransport {
    fn radio_state(&self) -> RadioState {
        self.lock().radio
    }

    fn start_discovery(&self, allow_duplicates: bool) {
        let Some(state) = self.record(TransportCall::StartDiscovery { allow_duplicates }) else {
            return;
        };
        for device in &state.devices {
            self.emit(TransportEvent::Advertisement {
                id: device.id.clone(),
                name: device.name.clone(),
                rssi: device.rssi,
                handle: device.handle(),
            });
        }
    }

    fn stop_discovery(&self) {
        let _ = self.record(TransportCall::StopDiscovery);
    }

    fn connect(&self, peripheral: &PeripheralHandle, options: ConnectOptions) {
        let Some(state) = self.record(TransportCall::Connect {
            peripheral: peripheral.clone(),
            options,
        }) else {
            return;
        };
        let event = if state.radio != RadioState::PoweredOn {
            return;
        } else if Self::device(&state, peripheral).is_some() {
            TransportEvent::Connected(peripheral.clone())
        } else {
            TransportEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                cause: Some(TransportError::new("Peripheral not found")),
            }
        };
        self.emit(event);
    }

    fn cancel_connection(&self, peripheral: &PeripheralHandle) {
        if self
            .record(TransportCall::CancelConnection(peripheral.clone()))
            .is_some()
        {
            self.emit(TransportEvent::Disconnected {
                peripheral: peripheral.clone(),
                cause: None,
            });
        }
    }

    fn discover_services(&self, peripheral: &PeripheralHandle, filter: Option<&[Uuid]>) {
        let Some(state) = self.record(TransportCall::DiscoverServices(peripheral.clone())) else {
            return;
        };
        let result = Self::device(&state, peripheral)
            .map(|device| {
                device
                    .services
                    .iter()
                    .map(|s| s.service.clone())
                    .filter(|s| filter.map_or(true, |f| f.contains(&s.uuid)))
                    .collect()
            })
            .ok_or_else(|| TransportError::new("Peripheral not connected"));
        self.emit(TransportEvent::ServicesDiscovered {
            peripheral: peripheral.clone(),
            result,
        });
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralHandle,
        service: &Service,
        filter: Option<&[Uuid]>,
    ) {
        let Some(state) = self.record(TransportCall::DiscoverCharacteristics {
            peripheral: peripheral.clone(),
            service: service.uuid,
        }) else {
            return;
        };
        let result = Self::device(&state, peripheral)
            .and_then(|d| d.services.iter().find(|s| s.service.uuid == service.uuid))
            .map(|s| {
                s.characteristics
                    .iter()
                    .map(|(c, _)| c.clone())
                    .filter(|c| filter.map_or(true, |f| f.contains(&c.uuid)))
                    .collect()
            })
            .ok_or_else(|| TransportError::new("Service not found"));
        self.emit(TransportEvent::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service: service.clone(),
            result,
        });
    }

    fn read_value(&self, _peripheral: &PeripheralHandle, characteristic: &Characteristic) {
        let Some(state) = self.record(TransportCall::ReadValue(characteristic.uuid)) else {
            return;
        };
        let value = state.values.get(&characteristic.uuid).cloned();
        self.emit(TransportEvent::ValueUpdated {
            characteristic: characteristic.clone(),
            result: Ok(value),
        });
    }

    fn write_value(
        &self,
        _peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        value: &[u8],
        mode: WriteMode,
    ) {
        let Some(mut state) = self.record(TransportCall::WriteValue {
            characteristic: characteristic.uuid,
            value: value.to_vec(),
            mode,
        }) else {
            return;
        };
        state.values.insert(characteristic.uuid, value.to_vec());
        if mode == WriteMode::WithResponse {
            self.emit(TransportEvent::ValueWritten {
                characteristic: characteristic.clone(),
                error: None,
            });
        }
    }

    fn set_notify(
        &self,
        _peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        enabled: bool,
    ) {
        if self
            .record(TransportCall::SetNotify {
                characteristic: characteristic.uuid,
                enabled,
            })
            .is_some()
        {
            self.emit(TransportEvent::NotificationStateChanged {
                characteristic: characteristic.clone(),
                enabled,
                error: None,
            });
        }
    }

    fn read_rssi(&self, peripheral: &PeripheralHandle) {
        let Some(state) = self.record(TransportCall::ReadRssi(peripheral.clone())) else {
            return;
        };
        let result = Self::device(&state, peripheral)
            .map(|d| d.rssi)
            .ok_or_else(|| TransportError::new("Peripheral not connected"));
        self.emit(TransportEvent::RssiRead {
            peripheral: peripheral.clone(),
            result,
        });
    }
}
