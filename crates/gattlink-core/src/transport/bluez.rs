//! BlueZ backend built on `bluer`.
//!
//! Each request spawns a short task on the tokio runtime that performs the
//! D-Bus calls and posts the outcome as a [`TransportEvent`]. Peripheral
//! handles carry the device address as their token.

use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bluer::gatt::remote::{CharacteristicWriteRequest, WriteOp};
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ConnectOptions, Transport, TransportError, TransportEvent, TransportEventSender,
    TransportEvents,
};
use crate::error::{GattlinkError, Result};
use crate::types::{
    Characteristic, CharacteristicProperties, DeviceId, PeripheralHandle, RadioState, Service,
    WriteMode,
};

const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn transport_error(err: &bluer::Error) -> TransportError {
    TransportError::new(err.to_string())
}

struct Shared {
    adapter: Adapter,
    events: TransportEventSender,
    powered: AtomicBool,
    power_watch: Mutex<Option<JoinHandle<()>>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    links: Mutex<HashMap<Address, JoinHandle<()>>>,
    cancelled: Mutex<HashSet<Address>>,
    notifications: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("transport event dropped, session has stopped");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let tasks = lock(&self.power_watch)
            .take()
            .into_iter()
            .chain(lock(&self.discovery).take())
            .chain(lock(&self.links).drain().map(|(_, task)| task))
            .chain(lock(&self.notifications).drain().map(|(_, task)| task))
            .collect::<Vec<_>>();
        for task in tasks {
            task.abort();
        }
    }
}

/// [`Transport`] over the default BlueZ adapter.
#[derive(Clone)]
pub struct BluezTransport {
    shared: Arc<Shared>,
}

impl BluezTransport {
    /// Open a BlueZ session on the default adapter and start watching its
    /// power state. The current state is reported as the first event.
    pub async fn new() -> Result<(Self, TransportEvents)> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| GattlinkError::BluetoothUnavailable(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| GattlinkError::BluetoothUnavailable(e.to_string()))?;
        let powered = adapter
            .is_powered()
            .await
            .map_err(|e| GattlinkError::BluetoothUnavailable(e.to_string()))?;
        info!(adapter = adapter.name(), powered, "using bluetooth adapter");

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            adapter,
            events: tx,
            powered: AtomicBool::new(powered),
            power_watch: Mutex::new(None),
            discovery: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
            notifications: Mutex::new(HashMap::new()),
        });
        shared.emit(TransportEvent::RadioStateChanged(radio_state(powered)));

        let watcher = tokio::spawn(watch_power(Arc::downgrade(&shared)));
        *lock(&shared.power_watch) = Some(watcher);

        Ok((Self { shared }, rx))
    }

    fn address(&self, peripheral: &PeripheralHandle) -> Option<Address> {
        match peripheral.token().parse() {
            Ok(address) => Some(address),
            Err(_) => {
                warn!(%peripheral, "peripheral handle is not a bluetooth address");
                None
            }
        }
    }

    fn device(&self, peripheral: &PeripheralHandle) -> Option<bluer::Device> {
        let address = self.address(peripheral)?;
        match self.shared.adapter.device(address) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!(%peripheral, error = %e, "device unavailable");
                None
            }
        }
    }
}

const fn radio_state(powered: bool) -> RadioState {
    if powered {
        RadioState::PoweredOn
    } else {
        RadioState::PoweredOff
    }
}

async fn watch_power(shared: std::sync::Weak<Shared>) {
    let Some(adapter) = shared.upgrade().map(|s| s.adapter.clone()) else {
        return;
    };
    let events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "failed to watch adapter events");
            return;
        }
    };
    let mut events = pin!(events);
    while let Some(event) = events.next().await {
        if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.powered.store(powered, Ordering::SeqCst);
            info!(powered, "adapter power changed");
            shared.emit(TransportEvent::RadioStateChanged(radio_state(powered)));
        }
    }
    debug!("adapter event stream ended");
}

async fn fetch_service(service: &bluer::gatt::remote::Service) -> bluer::Result<Service> {
    Ok(Service {
        uuid: service.uuid().await?,
        handle: service.id(),
        primary: service.primary().await?,
    })
}

async fn fetch_characteristic(
    service: &Service,
    characteristic: &bluer::gatt::remote::Characteristic,
) -> bluer::Result<Characteristic> {
    let flags = characteristic.flags().await?;
    Ok(Characteristic {
        uuid: characteristic.uuid().await?,
        handle: characteristic.id(),
        service_uuid: service.uuid,
        service_handle: service.handle,
        properties: CharacteristicProperties {
            read: flags.read,
            write: flags.write,
            write_without_response: flags.write_without_response,
            notify: flags.notify,
            indicate: flags.indicate,
        },
    })
}

async fn resolve_services(
    device: &bluer::Device,
    filter: Option<&[Uuid]>,
) -> bluer::Result<std::result::Result<Vec<Service>, TransportError>> {
    if !wait_services_resolved(device).await? {
        return Ok(Err(TransportError::new("service resolution timed out")));
    }
    let mut services = Vec::new();
    for remote in device.services().await? {
        let service = fetch_service(&remote).await?;
        if matches_filter(&service.uuid, filter) {
            services.push(service);
        }
    }
    debug!(address = %device.address(), count = services.len(), "services resolved");
    Ok(Ok(services))
}

async fn resolve_characteristics(
    device: &bluer::Device,
    service: &Service,
    filter: Option<&[Uuid]>,
) -> bluer::Result<Vec<Characteristic>> {
    let mut characteristics = Vec::new();
    for remote in device.service(service.handle).await?.characteristics().await? {
        let characteristic = fetch_characteristic(service, &remote).await?;
        if matches_filter(&characteristic.uuid, filter) {
            characteristics.push(characteristic);
        }
    }
    Ok(characteristics)
}

async fn write_remote(
    device: &bluer::Device,
    characteristic: &Characteristic,
    value: &[u8],
    mode: WriteMode,
) -> bluer::Result<()> {
    let remote = remote_characteristic(device, characteristic).await?;
    match mode {
        WriteMode::WithResponse => remote.write(value).await,
        WriteMode::WithoutResponse => {
            let request = CharacteristicWriteRequest {
                op_type: WriteOp::Command,
                ..CharacteristicWriteRequest::default()
            };
            remote.write_ext(value, &request).await
        }
    }
}

async fn wait_services_resolved(device: &bluer::Device) -> bluer::Result<bool> {
    let deadline = tokio::time::Instant::now() + SERVICES_RESOLVE_TIMEOUT;
    loop {
        if device.is_services_resolved().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
    }
}

async fn remote_characteristic(
    device: &bluer::Device,
    characteristic: &Characteristic,
) -> bluer::Result<bluer::gatt::remote::Characteristic> {
    device
        .service(characteristic.service_handle)
        .await?
        .characteristic(characteristic.handle)
        .await
}

fn matches_filter(uuid: &Uuid, filter: Option<&[Uuid]>) -> bool {
    filter.map_or(true, |wanted| wanted.contains(uuid))
}

impl Transport for BluezTransport {
    fn radio_state(&self) -> RadioState {
        radio_state(self.shared.powered.load(Ordering::SeqCst))
    }

    fn start_discovery(&self, allow_duplicates: bool) {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let filter = DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: allow_duplicates,
                ..DiscoveryFilter::default()
            };
            if let Err(e) = shared.adapter.set_discovery_filter(filter).await {
                shared.emit(TransportEvent::DiscoveryFailed(transport_error(&e)));
                return;
            }
            let events = match shared.adapter.discover_devices_with_changes().await {
                Ok(events) => events,
                Err(e) => {
                    shared.emit(TransportEvent::DiscoveryFailed(transport_error(&e)));
                    return;
                }
            };
            info!(allow_duplicates, "discovery started");
            let mut events = pin!(events);
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let Ok(device) = shared.adapter.device(address) else {
                    continue;
                };
                let Ok(Some(rssi)) = device.rssi().await else {
                    continue;
                };
                let name = device.name().await.ok().flatten();
                let token = address.to_string();
                shared.emit(TransportEvent::Advertisement {
                    id: DeviceId::new(token.clone()),
                    name,
                    rssi,
                    handle: PeripheralHandle::new(token),
                });
            }
            debug!("discovery stream ended");
        });
        if let Some(previous) = lock(&self.shared.discovery).replace(task) {
            previous.abort();
        }
    }

    fn stop_discovery(&self) {
        if let Some(task) = lock(&self.shared.discovery).take() {
            task.abort();
            info!("discovery stopped");
        }
    }

    fn connect(&self, peripheral: &PeripheralHandle, options: ConnectOptions) {
        let Some(address) = self.address(peripheral) else {
            self.shared.emit(TransportEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                cause: Some(TransportError::new("invalid bluetooth address")),
            });
            return;
        };
        if lock(&self.shared.links)
            .get(&address)
            .is_some_and(|task| !task.is_finished())
        {
            debug!(%address, "link task already running, keeping it");
            return;
        }
        lock(&self.shared.cancelled).remove(&address);

        let shared = Arc::clone(&self.shared);
        let peripheral = peripheral.clone();
        let task = tokio::spawn(async move {
            let device = match shared.adapter.device(address) {
                Ok(device) => device,
                Err(e) => {
                    shared.emit(TransportEvent::ConnectFailed {
                        peripheral,
                        cause: Some(transport_error(&e)),
                    });
                    return;
                }
            };
            let events = match device.events().await {
                Ok(events) => events,
                Err(e) => {
                    shared.emit(TransportEvent::ConnectFailed {
                        peripheral,
                        cause: Some(transport_error(&e)),
                    });
                    return;
                }
            };
            let mut events = pin!(events);

            if let Err(e) = device.connect().await {
                let cancelled = lock(&shared.cancelled).remove(&address);
                let event = if cancelled {
                    TransportEvent::Disconnected {
                        peripheral,
                        cause: None,
                    }
                } else {
                    TransportEvent::ConnectFailed {
                        peripheral,
                        cause: Some(transport_error(&e)),
                    }
                };
                shared.emit(event);
                return;
            }
            debug!(%address, notify_on_disconnect = options.notify_on_disconnect, "link established");
            shared.emit(TransportEvent::Connected(peripheral.clone()));

            while let Some(event) = events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    break;
                }
            }
            let cause = if lock(&shared.cancelled).remove(&address) {
                None
            } else {
                Some(TransportError::new("connection lost"))
            };
            shared.emit(TransportEvent::Disconnected { peripheral, cause });
        });
        if let Some(previous) = lock(&self.shared.links).insert(address, task) {
            previous.abort();
        }
    }

    fn cancel_connection(&self, peripheral: &PeripheralHandle) {
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let address = device.address();
        lock(&self.shared.cancelled).insert(address);
        tokio::spawn(async move {
            if let Err(e) = device.disconnect().await {
                debug!(%address, error = %e, "disconnect request failed");
            }
        });
    }

    fn discover_services(&self, peripheral: &PeripheralHandle, filter: Option<&[Uuid]>) {
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let peripheral = peripheral.clone();
        let filter = filter.map(<[Uuid]>::to_vec);
        tokio::spawn(async move {
            let result = resolve_services(&device, filter.as_deref())
                .await
                .unwrap_or_else(|e| Err(transport_error(&e)));
            shared.emit(TransportEvent::ServicesDiscovered { peripheral, result });
        });
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralHandle,
        service: &Service,
        filter: Option<&[Uuid]>,
    ) {
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let peripheral = peripheral.clone();
        let service = service.clone();
        let filter = filter.map(<[Uuid]>::to_vec);
        tokio::spawn(async move {
            let result = resolve_characteristics(&device, &service, filter.as_deref())
                .await
                .map_err(|e| transport_error(&e));
            shared.emit(TransportEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            });
        });
    }

    fn read_value(&self, peripheral: &PeripheralHandle, characteristic: &Characteristic) {
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let characteristic = characteristic.clone();
        tokio::spawn(async move {
            let result = match remote_characteristic(&device, &characteristic).await {
                Ok(remote) => remote.read().await,
                Err(e) => Err(e),
            }
            .map(Some)
            .map_err(|e| transport_error(&e));
            shared.emit(TransportEvent::ValueUpdated {
                characteristic,
                result,
            });
        });
    }

    fn write_value(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        value: &[u8],
        mode: WriteMode,
    ) {
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let characteristic = characteristic.clone();
        let value = value.to_vec();
        tokio::spawn(async move {
            let outcome = write_remote(&device, &characteristic, &value, mode).await;
            match (mode, outcome) {
                (WriteMode::WithResponse, outcome) => {
                    shared.emit(TransportEvent::ValueWritten {
                        characteristic,
                        error: outcome.err().map(|e| transport_error(&e)),
                    });
                }
                (WriteMode::WithoutResponse, Err(e)) => {
                    debug!(uuid = %characteristic.uuid, error = %e, "unacknowledged write failed");
                }
                (WriteMode::WithoutResponse, Ok(())) => {}
            }
        });
    }

    fn set_notify(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &Characteristic,
        enabled: bool,
    ) {
        let characteristic = characteristic.clone();
        if let Some(task) = lock(&self.shared.notifications).remove(&characteristic.uuid) {
            task.abort();
        }
        if !enabled {
            self.shared.emit(TransportEvent::NotificationStateChanged {
                characteristic,
                enabled,
                error: None,
            });
            return;
        }
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let uuid = characteristic.uuid;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let stream = match remote_characteristic(&device, &characteristic).await {
                Ok(remote) => remote.notify().await,
                Err(e) => Err(e),
            };
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    shared.emit(TransportEvent::NotificationStateChanged {
                        characteristic,
                        enabled,
                        error: Some(transport_error(&e)),
                    });
                    return;
                }
            };
            shared.emit(TransportEvent::NotificationStateChanged {
                characteristic: characteristic.clone(),
                enabled,
                error: None,
            });
            let mut stream = pin!(stream);
            while let Some(value) = stream.next().await {
                shared.emit(TransportEvent::ValueUpdated {
                    characteristic: characteristic.clone(),
                    result: Ok(Some(value)),
                });
            }
            debug!(uuid = %characteristic.uuid, "notification stream ended");
        });
        lock(&self.shared.notifications).insert(uuid, task);
    }

    fn read_rssi(&self, peripheral: &PeripheralHandle) {
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let result = match device.rssi().await {
                Ok(Some(rssi)) => Ok(rssi),
                Ok(None) => Err(TransportError::new("RSSI unavailable")),
                Err(e) => Err(transport_error(&e)),
            };
            shared.emit(TransportEvent::RssiRead { peripheral, result });
        });
    }
}

impl std::fmt::Debug for BluezTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezTransport")
            .field("adapter", &self.shared.adapter.name())
            .field("radio", &self.radio_state())
            .finish_non_exhaustive()
    }
}
