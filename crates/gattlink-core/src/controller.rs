//! The connection and session state machine.
//!
//! [`SessionController`] owns every piece of mutable session state: the
//! connection state, the device registry, the GATT cache, the RSSI monitor,
//! the timers and the reconnect policy. It is driven from a single
//! sequential context (see [`Session`](crate::Session)): caller commands,
//! transport events and timer firings are applied one at a time, so no
//! locking is needed.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{EventPublisher, SessionEvent};
use crate::gatt::GattCache;
use crate::monitor::RssiMonitor;
use crate::registry::DeviceRegistry;
use crate::timer::{TimerFired, TimerKind, Timers};
use crate::transport::{ConnectOptions, Transport, TransportError, TransportEvent};
use crate::types::{
    Characteristic, ConnectionState, Device, PeripheralHandle, RadioState, Service, WriteMode,
};

/// Caller commands. Each returns immediately; outcomes arrive as events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Clear the registry and start discovery.
    StartScan,
    /// Stop discovery.
    StopScan,
    /// Connect to a device and make it the reconnect target.
    Connect(Device),
    /// Drop the link and disable auto-reconnect.
    Disconnect,
    /// Sample RSSI once.
    ReadRssi,
    /// Read a cached characteristic.
    ReadCharacteristic(Uuid),
    /// Write a cached characteristic.
    WriteCharacteristic {
        /// Characteristic UUID.
        uuid: Uuid,
        /// Bytes to write.
        value: Vec<u8>,
        /// Acknowledgement mode.
        mode: WriteMode,
    },
    /// Toggle notifications on a cached characteristic.
    SetNotify {
        /// Characteristic UUID.
        uuid: Uuid,
        /// Desired state.
        enabled: bool,
    },
    /// The host application moved to the background.
    EnterBackground,
    /// The host application returned to the foreground.
    EnterForeground,
}

/// Why a connect request is being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectReason {
    User,
    Reconnect,
    RadioRestored,
    Foreground,
}

impl ConnectReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Reconnect => "reconnect",
            Self::RadioRestored => "radio_restored",
            Self::Foreground => "foreground",
        }
    }
}

/// Single-owner state machine for one BLE central session.
pub struct SessionController<T: Transport> {
    transport: T,
    config: SessionConfig,
    publisher: EventPublisher,
    state: watch::Sender<ConnectionState>,
    registry: DeviceRegistry,
    gatt: GattCache,
    monitor: RssiMonitor,
    timers: Timers,
    active: Option<PeripheralHandle>,
    connecting: Option<PeripheralHandle>,
    reconnect_target: Option<Device>,
    auto_reconnect: bool,
    was_connected_before_background: bool,
}

impl<T: Transport> SessionController<T> {
    /// Create a controller in `Idle`. Timer firings are sent on `timer_tx`
    /// and must be fed back through [`handle_timer`](Self::handle_timer).
    pub fn new(
        transport: T,
        config: SessionConfig,
        timer_tx: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        let publisher = EventPublisher::new(config.event_buffer);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let monitor = RssiMonitor::new(
            config.rssi_poll_interval(),
            config.weak_signal_threshold_dbm,
        );
        Self {
            transport,
            config,
            publisher,
            state,
            registry: DeviceRegistry::new(),
            gatt: GattCache::new(),
            monitor,
            timers: Timers::new(timer_tx),
            active: None,
            connecting: None,
            reconnect_target: None,
            auto_reconnect: true,
            was_connected_before_background: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Observer broadcast.
    #[must_use]
    pub const fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Devices seen during the current scan.
    #[must_use]
    pub const fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Attributes of the connected peripheral.
    #[must_use]
    pub const fn gatt(&self) -> &GattCache {
        &self.gatt
    }

    /// The RSSI monitor.
    #[must_use]
    pub const fn monitor(&self) -> &RssiMonitor {
        &self.monitor
    }

    /// Armed timers.
    #[must_use]
    pub const fn timers(&self) -> &Timers {
        &self.timers
    }

    /// The connected peripheral, if any.
    #[must_use]
    pub const fn active_peripheral(&self) -> Option<&PeripheralHandle> {
        self.active.as_ref()
    }

    /// Target of automatic and foreground reconnects.
    #[must_use]
    pub const fn reconnect_target(&self) -> Option<&Device> {
        self.reconnect_target.as_ref()
    }

    /// Whether unexpected disconnects trigger a reconnect.
    #[must_use]
    pub const fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    /// The transport being driven.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    // ── Dispatch ─────────────────────────────────────────────────

    /// Apply a caller command.
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan => self.start_scan(),
            Command::StopScan => self.stop_scan(),
            Command::Connect(device) => self.connect(device),
            Command::Disconnect => self.disconnect(),
            Command::ReadRssi => self.read_rssi(),
            Command::ReadCharacteristic(uuid) => self.read_characteristic(uuid),
            Command::WriteCharacteristic { uuid, value, mode } => {
                self.write_characteristic(uuid, &value, mode);
            }
            Command::SetNotify { uuid, enabled } => self.set_notify(uuid, enabled),
            Command::EnterBackground => self.enter_background(),
            Command::EnterForeground => self.enter_foreground(),
        }
    }

    /// Apply an event reported by the transport.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::RadioStateChanged(radio) => self.on_radio_state(radio),
            TransportEvent::Advertisement {
                id,
                name,
                rssi,
                handle,
            } => {
                self.registry.upsert(Device::new(id, name, rssi, handle));
                self.publisher
                    .publish(SessionEvent::DevicesUpdated(self.registry.snapshot()));
            }
            TransportEvent::DiscoveryFailed(cause) => {
                warn!(error = %cause, "discovery failed");
                self.report_transport_failure(cause);
            }
            TransportEvent::Connected(peripheral) => self.on_connected(peripheral),
            TransportEvent::ConnectFailed { peripheral, cause } => {
                let cause = cause.unwrap_or_else(TransportError::unknown);
                warn!(%peripheral, error = %cause, "connection attempt failed");
                self.publisher
                    .publish(SessionEvent::Error(SessionError::ConnectFailed { cause }));
            }
            TransportEvent::Disconnected { peripheral, cause } => {
                self.on_disconnected(peripheral, cause);
            }
            TransportEvent::ServicesDiscovered { peripheral, result } => {
                self.on_services_discovered(&peripheral, result);
            }
            TransportEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => self.on_characteristics_discovered(&peripheral, service, result),
            TransportEvent::ValueUpdated {
                characteristic,
                result,
            } => match result {
                Ok(value) => self.publisher.publish(SessionEvent::ValueUpdated {
                    characteristic,
                    value,
                }),
                Err(cause) => self.report_transport_failure(cause),
            },
            TransportEvent::ValueWritten {
                characteristic,
                error,
            } => match error {
                None => self
                    .publisher
                    .publish(SessionEvent::ValueWritten(characteristic)),
                Some(cause) => self.report_transport_failure(cause),
            },
            TransportEvent::NotificationStateChanged {
                characteristic,
                enabled,
                error,
            } => match error {
                None => self.publisher.publish(SessionEvent::NotificationStateChanged {
                    characteristic,
                    enabled,
                }),
                Some(cause) => self.report_transport_failure(cause),
            },
            TransportEvent::RssiRead { peripheral, result } => {
                self.on_rssi_read(&peripheral, result);
            }
        }
    }

    /// Apply a timer firing. Stale firings are ignored.
    pub fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            debug!(kind = ?fired.kind, generation = fired.generation, "ignoring stale timer");
            return;
        }
        match fired.kind {
            TimerKind::ConnectionTimeout => self.on_connection_timeout(),
            TimerKind::Reconnect => match self.reconnect_target.clone() {
                Some(target) => {
                    info!(device = %target.id, "reconnecting after unexpected disconnect");
                    self.request_connect(&target.handle, ConnectReason::Reconnect);
                }
                None => debug!("reconnect timer fired without a target"),
            },
            TimerKind::RssiPoll => {
                if let Some(peripheral) = self
                    .active
                    .as_ref()
                    .filter(|p| self.monitor.target() == Some(*p))
                {
                    self.transport.read_rssi(peripheral);
                }
            }
        }
    }

    /// Release the radio: stop discovery, monitoring and timers, drop the link.
    pub fn shutdown(&mut self) {
        self.auto_reconnect = false;
        self.monitor.stop(&mut self.timers);
        self.timers.cancel_all();
        self.transport.stop_discovery();
        if let Some(peripheral) = self.active.take() {
            self.transport.cancel_connection(&peripheral);
        }
        info!("session shut down");
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Clear the registry and begin discovery if the radio is on.
    pub fn start_scan(&mut self) {
        self.registry.clear();
        self.publisher
            .publish(SessionEvent::DevicesUpdated(Vec::new()));
        if self.transport.radio_state() != RadioState::PoweredOn {
            warn!("scan requested while radio is not powered on");
            self.publisher
                .publish(SessionEvent::Error(SessionError::RadioUnavailable));
            return;
        }
        self.transport.start_discovery(self.config.allow_duplicates);
        self.set_state(ConnectionState::Scanning);
    }

    /// Stop discovery; leaves `Scanning` for `Idle`.
    pub fn stop_scan(&mut self) {
        self.transport.stop_discovery();
        if self.state() == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Connect to `device` and remember it as the reconnect target.
    pub fn connect(&mut self, device: Device) {
        if self.config.cancel_pending_reconnect && self.timers.cancel(TimerKind::Reconnect) {
            debug!("pending reconnect superseded by connect");
        }
        self.auto_reconnect = true;
        let handle = device.handle.clone();
        info!(device = %device.id, name = %device.name, "connecting");
        self.reconnect_target = Some(device);
        self.request_connect(&handle, ConnectReason::User);
    }

    /// Disable auto-reconnect, stop monitoring and drop the active link.
    pub fn disconnect(&mut self) {
        self.auto_reconnect = false;
        if self.config.cancel_pending_reconnect && self.timers.cancel(TimerKind::Reconnect) {
            debug!("pending reconnect cancelled by disconnect");
        }
        self.monitor.stop(&mut self.timers);
        match self.active.as_ref() {
            Some(peripheral) => {
                info!(%peripheral, "disconnecting");
                self.transport.cancel_connection(peripheral);
            }
            None => debug!("disconnect requested with no active peripheral"),
        }
    }

    /// Sample the link RSSI once.
    pub fn read_rssi(&mut self) {
        if let Some(peripheral) = self.active.as_ref() {
            self.transport.read_rssi(peripheral);
        }
    }

    /// Read a characteristic by UUID. Silently ignored when not connected
    /// or when the characteristic is unknown.
    pub fn read_characteristic(&mut self, uuid: Uuid) {
        if let Some((peripheral, characteristic)) = self.target_characteristic(uuid) {
            self.transport.read_value(peripheral, characteristic);
        }
    }

    /// Write a characteristic by UUID. Silently ignored when not connected
    /// or when the characteristic is unknown.
    pub fn write_characteristic(&mut self, uuid: Uuid, value: &[u8], mode: WriteMode) {
        if let Some((peripheral, characteristic)) = self.target_characteristic(uuid) {
            self.transport
                .write_value(peripheral, characteristic, value, mode);
        }
    }

    /// Toggle notifications by UUID. Silently ignored when not connected
    /// or when the characteristic is unknown.
    pub fn set_notify(&mut self, uuid: Uuid, enabled: bool) {
        if let Some((peripheral, characteristic)) = self.target_characteristic(uuid) {
            self.transport.set_notify(peripheral, characteristic, enabled);
        }
    }

    /// Remember whether a link was up when the app went to the background.
    pub fn enter_background(&mut self) {
        self.was_connected_before_background = self.active.is_some();
        debug!(
            was_connected = self.was_connected_before_background,
            "entered background"
        );
    }

    /// Reconnect the last target if a link was up before backgrounding.
    /// This ignores the auto-reconnect flag.
    pub fn enter_foreground(&mut self) {
        if !self.was_connected_before_background {
            return;
        }
        if let Some(target) = self.reconnect_target.clone() {
            info!(device = %target.id, "restoring link after foreground");
            self.request_connect(&target.handle, ConnectReason::Foreground);
        }
    }

    // ── Transport events ─────────────────────────────────────────

    fn on_radio_state(&mut self, radio: RadioState) {
        match radio {
            RadioState::PoweredOn => {
                info!("radio powered on");
                if !self.auto_reconnect {
                    return;
                }
                if let Some(target) = self.reconnect_target.clone() {
                    self.request_connect(&target.handle, ConnectReason::RadioRestored);
                }
            }
            RadioState::PoweredOff => {
                warn!("radio powered off");
                self.drop_link_for_radio();
                self.publisher
                    .publish(SessionEvent::Error(SessionError::RadioOff));
            }
            RadioState::Resetting => {
                warn!("radio resetting");
                self.drop_link_for_radio();
            }
            RadioState::Other => debug!("radio state unavailable"),
        }
    }

    fn on_connected(&mut self, peripheral: PeripheralHandle) {
        self.timers.cancel(TimerKind::ConnectionTimeout);
        self.connecting = None;
        self.active = Some(peripheral.clone());
        self.gatt.clear();
        self.set_state(ConnectionState::Connected);
        self.monitor.start(&mut self.timers, peripheral.clone());
        info!(%peripheral, "connected");
        self.publisher
            .publish(SessionEvent::Connected(peripheral.clone()));
        self.transport.discover_services(&peripheral, None);
    }

    fn on_disconnected(&mut self, peripheral: PeripheralHandle, cause: Option<TransportError>) {
        self.monitor.stop(&mut self.timers);
        self.active = None;
        self.gatt.clear();
        self.set_state(ConnectionState::Disconnected);
        match &cause {
            Some(error) => warn!(%peripheral, %error, "link lost"),
            None => info!(%peripheral, "disconnected"),
        }
        let unexpected = cause.is_some();
        self.publisher
            .publish(SessionEvent::Disconnected { peripheral, cause });

        if self.auto_reconnect && unexpected && self.reconnect_target.is_some() {
            let delay = self.config.reconnect_delay();
            info!(delay_secs = delay.as_secs(), "scheduling reconnect");
            self.timers.schedule(TimerKind::Reconnect, delay);
        }
    }

    fn on_services_discovered(
        &mut self,
        peripheral: &PeripheralHandle,
        result: Result<Vec<Service>, TransportError>,
    ) {
        let services = match result {
            Ok(services) => services,
            Err(cause) => {
                warn!(%peripheral, error = %cause, "service discovery failed");
                self.report_transport_failure(cause);
                return;
            }
        };
        if !self.is_active(peripheral) {
            debug!(%peripheral, "dropping services from inactive peripheral");
            return;
        }
        debug!(%peripheral, count = services.len(), "services discovered");
        for service in &services {
            self.gatt.register_service(service.clone());
            self.transport
                .discover_characteristics(peripheral, service, None);
        }
        self.publisher
            .publish(SessionEvent::ServicesDiscovered(services));
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: &PeripheralHandle,
        service: Service,
        result: Result<Vec<Characteristic>, TransportError>,
    ) {
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(cause) => {
                warn!(%peripheral, service = %service.uuid, error = %cause, "characteristic discovery failed");
                self.report_transport_failure(cause);
                return;
            }
        };
        if !self.is_active(peripheral) {
            debug!(%peripheral, "dropping characteristics from inactive peripheral");
            return;
        }
        for characteristic in &characteristics {
            self.gatt.register_characteristic(characteristic.clone());
        }
        self.publisher.publish(SessionEvent::CharacteristicsDiscovered {
            service,
            characteristics,
        });
    }

    fn on_rssi_read(&mut self, peripheral: &PeripheralHandle, result: Result<i16, TransportError>) {
        let rssi = match result {
            Ok(rssi) => rssi,
            Err(cause) => {
                debug!(%peripheral, error = %cause, "rssi read failed");
                self.report_transport_failure(cause);
                return;
            }
        };
        self.publisher.publish(SessionEvent::RssiUpdated(rssi));
        let sample = self.monitor.sample(rssi);
        if sample.weak {
            warn!(rssi, "weak signal");
            self.publisher
                .publish(SessionEvent::Error(SessionError::WeakSignal { rssi }));
        }
    }

    fn on_connection_timeout(&mut self) {
        if self.state() != ConnectionState::Connecting {
            debug!(state = %self.state(), "connection timeout after attempt resolved");
            return;
        }
        warn!(
            timeout_secs = self.config.connection_timeout_secs,
            "connection attempt timed out"
        );
        self.publisher
            .publish(SessionEvent::Error(SessionError::ConnectionTimeout));
        if self.config.abort_on_timeout {
            if let Some(peripheral) = self.connecting.take() {
                self.transport.cancel_connection(&peripheral);
            }
            self.set_state(ConnectionState::Disconnected);
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Tear down link state after the radio went away. The reconnect target
    /// is kept; radio-on reconnects instead of a pending reconnect timer.
    fn drop_link_for_radio(&mut self) {
        self.active = None;
        self.connecting = None;
        self.monitor.stop(&mut self.timers);
        self.timers.cancel(TimerKind::ConnectionTimeout);
        if self.timers.cancel(TimerKind::Reconnect) {
            debug!("pending reconnect deferred until radio returns");
        }
        self.gatt.clear();
        if matches!(
            self.state(),
            ConnectionState::Scanning | ConnectionState::Connecting | ConnectionState::Connected
        ) {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn request_connect(&mut self, peripheral: &PeripheralHandle, reason: ConnectReason) {
        let options = ConnectOptions {
            notify_on_disconnect: reason == ConnectReason::User,
        };
        if self.is_active(peripheral) {
            debug!(%peripheral, reason = reason.as_str(), "link already up, re-issuing connect");
            self.transport.connect(peripheral, options);
            return;
        }
        debug!(%peripheral, reason = reason.as_str(), "issuing connect request");
        self.timers
            .schedule(TimerKind::ConnectionTimeout, self.config.connection_timeout());
        self.connecting = Some(peripheral.clone());
        self.transport.connect(peripheral, options);
        self.set_state(ConnectionState::Connecting);
    }

    fn target_characteristic(&self, uuid: Uuid) -> Option<(&PeripheralHandle, &Characteristic)> {
        let Some(peripheral) = self.active.as_ref() else {
            debug!(%uuid, "no active peripheral, ignoring characteristic request");
            return None;
        };
        let Some(characteristic) = self.gatt.characteristic(&uuid) else {
            debug!(%uuid, "unknown characteristic, ignoring request");
            return None;
        };
        Some((peripheral, characteristic))
    }

    fn is_active(&self, peripheral: &PeripheralHandle) -> bool {
        self.active.as_ref() == Some(peripheral)
    }

    fn report_transport_failure(&self, cause: TransportError) {
        self.publisher
            .publish(SessionEvent::Error(SessionError::TransportFailure(cause)));
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "connection state changed");
            self.publisher.publish(SessionEvent::StateChanged(next));
        }
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for SessionController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .field("active", &self.active)
            .field("reconnect_target", &self.reconnect_target.as_ref().map(|d| &d.id))
            .field("auto_reconnect", &self.auto_reconnect)
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::broadcast;
    use tokio::time::{self, Instant};

    use crate::transport::mock::{MockTransport, TransportCall};
    use crate::types::{CharacteristicProperties, DeviceId};

    const HEART_RATE: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);
    const MEASUREMENT: Uuid = Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

    struct Harness {
        controller: SessionController<MockTransport>,
        mock: MockTransport,
        timer_rx: mpsc::UnboundedReceiver<TimerFired>,
        events: broadcast::Receiver<SessionEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(SessionConfig::default())
        }

        fn with_config(config: SessionConfig) -> Self {
            let (mock, _transport_events) = MockTransport::new();
            let (timer_tx, timer_rx) = mpsc::unbounded_channel();
            let controller = SessionController::new(mock.clone(), config, timer_tx);
            let events = controller.publisher().subscribe();
            Self {
                controller,
                mock,
                timer_rx,
                events,
            }
        }

        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn errors(&mut self) -> Vec<SessionError> {
            self.drain()
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::Error(err) => Some(err),
                    _ => None,
                })
                .collect()
        }

        async fn next_timer(&mut self) -> TimerFired {
            self.timer_rx.recv().await.unwrap()
        }

        fn connect_count(&self) -> usize {
            self.mock
                .calls()
                .iter()
                .filter(|c| matches!(c, TransportCall::Connect { .. }))
                .count()
        }

        /// Connect to `device` and confirm the link.
        fn establish(&mut self, device: &Device) {
            self.controller.connect(device.clone());
            self.controller
                .handle_transport_event(TransportEvent::Connected(device.handle.clone()));
        }
    }

    fn device(id: &str, rssi: i16) -> Device {
        let id = DeviceId::new(id);
        let handle = MockTransport::handle_for(&id);
        Device::new(id, Some("Sensor".into()), rssi, handle)
    }

    fn heart_rate_service() -> Service {
        Service {
            uuid: HEART_RATE,
            handle: 1,
            primary: true,
        }
    }

    fn measurement() -> Characteristic {
        Characteristic {
            uuid: MEASUREMENT,
            handle: 2,
            service_uuid: HEART_RATE,
            service_handle: 1,
            properties: CharacteristicProperties {
                read: true,
                notify: true,
                ..CharacteristicProperties::default()
            },
        }
    }

    fn discover_gatt(h: &mut Harness, peripheral: &PeripheralHandle) {
        h.controller
            .handle_transport_event(TransportEvent::ServicesDiscovered {
                peripheral: peripheral.clone(),
                result: Ok(vec![heart_rate_service()]),
            });
        h.controller
            .handle_transport_event(TransportEvent::CharacteristicsDiscovered {
                peripheral: peripheral.clone(),
                service: heart_rate_service(),
                result: Ok(vec![measurement()]),
            });
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_from_idle_enters_connecting() {
        let mut h = Harness::new();
        let target = device("a", -50);

        h.controller.connect(target.clone());

        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        assert!(h.controller.auto_reconnect());
        assert_eq!(h.controller.reconnect_target(), Some(&target));
        assert!(h.controller.timers().is_armed(TimerKind::ConnectionTimeout));
        assert_eq!(
            h.mock.calls(),
            vec![TransportCall::Connect {
                peripheral: target.handle,
                options: ConnectOptions {
                    notify_on_disconnect: true
                },
            }]
        );
        assert_eq!(
            h.drain(),
            vec![SessionEvent::StateChanged(ConnectionState::Connecting)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_event_starts_session() {
        let mut h = Harness::new();
        let target = device("a", -50);

        h.establish(&target);

        assert_eq!(h.controller.state(), ConnectionState::Connected);
        assert_eq!(h.controller.active_peripheral(), Some(&target.handle));
        assert!(h.controller.gatt().is_empty());
        assert!(h.controller.monitor().is_running());
        assert!(!h.controller.timers().is_armed(TimerKind::ConnectionTimeout));
        assert_eq!(
            h.mock.calls().last(),
            Some(&TransportCall::DiscoverServices(target.handle.clone()))
        );
        assert!(h
            .drain()
            .contains(&SessionEvent::Connected(target.handle)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_never_fires_after_successful_connect() {
        let mut h = Harness::new();
        h.establish(&device("a", -50));
        h.drain();

        let deadline = Instant::now() + Duration::from_secs(31);
        let mut polls = 0;
        while let Ok(Some(fired)) = time::timeout_at(deadline, h.timer_rx.recv()).await {
            assert_ne!(fired.kind, TimerKind::ConnectionTimeout);
            polls += 1;
            h.controller.handle_timer(fired);
        }

        assert_eq!(polls, 15);
        assert!(h.errors().is_empty());
        let rssi_reads = h
            .mock
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::ReadRssi(_)))
            .count();
        assert_eq!(rssi_reads, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_advisory_by_default() {
        let mut h = Harness::new();
        h.controller.connect(device("a", -50));
        let start = Instant::now();

        let fired = h.next_timer().await;
        assert_eq!(fired.kind, TimerKind::ConnectionTimeout);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        h.controller.handle_timer(fired);

        assert_eq!(h.errors(), vec![SessionError::ConnectionTimeout]);
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        assert!(!h
            .mock
            .calls()
            .iter()
            .any(|c| matches!(c, TransportCall::CancelConnection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_attempt_when_configured() {
        let mut h = Harness::with_config(SessionConfig {
            abort_on_timeout: true,
            ..SessionConfig::default()
        });
        let target = device("a", -50);
        h.controller.connect(target.clone());

        let fired = h.next_timer().await;
        h.controller.handle_timer(fired);

        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert_eq!(
            h.mock.calls().last(),
            Some(&TransportCall::CancelConnection(target.handle))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_disconnect_schedules_single_reconnect() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);

        h.controller
            .handle_transport_event(TransportEvent::Disconnected {
                peripheral: target.handle.clone(),
                cause: Some(TransportError::new("supervision timeout")),
            });

        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert!(h.controller.active_peripheral().is_none());
        assert!(!h.controller.monitor().is_running());
        assert!(h.controller.timers().is_armed(TimerKind::Reconnect));
        assert_eq!(h.connect_count(), 1);

        let start = Instant::now();
        let fired = h.next_timer().await;
        assert_eq!(fired.kind, TimerKind::Reconnect);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        h.controller.handle_timer(fired);

        assert_eq!(h.connect_count(), 2);
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        assert!(!h.controller.timers().is_armed(TimerKind::Reconnect));
        assert_eq!(
            h.mock.calls().last(),
            Some(&TransportCall::Connect {
                peripheral: target.handle,
                options: ConnectOptions::default(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_does_not_reconnect() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);

        h.controller.disconnect();
        assert!(!h.controller.auto_reconnect());
        assert!(!h.controller.monitor().is_running());
        assert_eq!(
            h.mock.calls().last(),
            Some(&TransportCall::CancelConnection(target.handle.clone()))
        );

        h.controller
            .handle_transport_event(TransportEvent::Disconnected {
                peripheral: target.handle.clone(),
                cause: None,
            });

        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert!(!h.controller.timers().is_armed(TimerKind::Reconnect));
        assert_eq!(h.controller.reconnect_target(), Some(&target));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_without_link_is_noop() {
        let mut h = Harness::new();
        h.controller.disconnect();
        assert!(h.mock.calls().is_empty());
        assert!(h.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_weak_signal_threshold_is_strict() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        h.drain();

        h.controller.handle_transport_event(TransportEvent::RssiRead {
            peripheral: target.handle.clone(),
            result: Ok(-85),
        });
        assert_eq!(h.drain(), vec![SessionEvent::RssiUpdated(-85)]);

        h.controller.handle_transport_event(TransportEvent::RssiRead {
            peripheral: target.handle,
            result: Ok(-86),
        });
        assert_eq!(
            h.drain(),
            vec![
                SessionEvent::RssiUpdated(-86),
                SessionEvent::Error(SessionError::WeakSignal { rssi: -86 }),
            ]
        );
        assert_eq!(h.controller.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_isolated_between_peripherals() {
        let mut h = Harness::new();
        let first = device("a", -50);
        let second = device("b", -60);

        h.establish(&first);
        discover_gatt(&mut h, &first.handle);
        assert!(h.controller.gatt().service(&HEART_RATE).is_some());
        assert!(h.controller.gatt().characteristic(&MEASUREMENT).is_some());

        h.controller.disconnect();
        h.controller
            .handle_transport_event(TransportEvent::Disconnected {
                peripheral: first.handle.clone(),
                cause: None,
            });
        assert!(h.controller.gatt().is_empty());

        h.establish(&second);
        assert!(h.controller.gatt().is_empty());

        // A late answer for the old peripheral must not leak into the new session.
        discover_gatt(&mut h, &first.handle);
        assert!(h.controller.gatt().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_discovery_requests_characteristics() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        h.drain();

        discover_gatt(&mut h, &target.handle);

        assert!(h.mock.calls().contains(&TransportCall::DiscoverCharacteristics {
            peripheral: target.handle,
            service: HEART_RATE,
        }));
        assert_eq!(
            h.drain(),
            vec![
                SessionEvent::ServicesDiscovered(vec![heart_rate_service()]),
                SessionEvent::CharacteristicsDiscovered {
                    service: heart_rate_service(),
                    characteristics: vec![measurement()],
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_discovery_failure_leaves_cache_untouched() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        h.drain();

        h.controller
            .handle_transport_event(TransportEvent::ServicesDiscovered {
                peripheral: target.handle,
                result: Err(TransportError::new("att error")),
            });

        assert!(h.controller.gatt().is_empty());
        assert_eq!(
            h.errors(),
            vec![SessionError::TransportFailure(TransportError::new("att error"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_requires_powered_radio() {
        let mut h = Harness::new();
        h.mock.set_radio_state(RadioState::PoweredOff);

        h.controller.start_scan();

        assert_eq!(h.controller.state(), ConnectionState::Idle);
        assert_eq!(h.errors(), vec![SessionError::RadioUnavailable]);
        assert!(h.mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_restart_publishes_empty_device_list() {
        let mut h = Harness::new();
        h.controller.start_scan();
        let d = device("a", -40);
        h.controller
            .handle_transport_event(TransportEvent::Advertisement {
                id: d.id,
                name: None,
                rssi: -40,
                handle: d.handle,
            });
        h.drain();

        h.mock.set_radio_state(RadioState::PoweredOff);
        h.controller.start_scan();

        assert!(h.controller.registry().is_empty());
        assert_eq!(
            h.drain(),
            vec![
                SessionEvent::DevicesUpdated(Vec::new()),
                SessionEvent::Error(SessionError::RadioUnavailable),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_collects_sorted_devices() {
        let mut h = Harness::new();
        h.controller.start_scan();
        assert_eq!(h.controller.state(), ConnectionState::Scanning);
        assert_eq!(
            h.mock.calls(),
            vec![TransportCall::StartDiscovery {
                allow_duplicates: true
            }]
        );

        for (id, rssi) in [("y", -60), ("x", -50)] {
            let d = device(id, rssi);
            h.controller
                .handle_transport_event(TransportEvent::Advertisement {
                    id: d.id,
                    name: None,
                    rssi,
                    handle: d.handle,
                });
        }

        let last = h
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::DevicesUpdated(devices) => Some(devices),
                _ => None,
            })
            .last()
            .unwrap();
        let ids: Vec<&str> = last.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert!(last.iter().all(|d| d.name == "Unknown"));

        h.controller.start_scan();
        assert!(h.controller.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_scan_only_leaves_scanning() {
        let mut h = Harness::new();
        h.controller.start_scan();
        h.controller.stop_scan();
        assert_eq!(h.controller.state(), ConnectionState::Idle);

        h.establish(&device("a", -50));
        h.controller.stop_scan();
        assert_eq!(h.controller.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_off_folds_into_disconnected_and_recovers() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        discover_gatt(&mut h, &target.handle);
        h.drain();

        h.controller
            .handle_transport_event(TransportEvent::RadioStateChanged(RadioState::PoweredOff));

        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert!(h.controller.active_peripheral().is_none());
        assert!(!h.controller.monitor().is_running());
        assert!(h.controller.gatt().is_empty());
        assert!(h.errors().contains(&SessionError::RadioOff));

        let _ = h.mock.take_calls();
        h.controller
            .handle_transport_event(TransportEvent::RadioStateChanged(RadioState::PoweredOn));

        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        assert_eq!(
            h.mock.calls(),
            vec![TransportCall::Connect {
                peripheral: target.handle,
                options: ConnectOptions::default(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_on_without_auto_reconnect_stays_put() {
        let mut h = Harness::new();
        h.establish(&device("a", -50));
        h.controller.disconnect();
        let _ = h.mock.take_calls();

        h.controller
            .handle_transport_event(TransportEvent::RadioStateChanged(RadioState::PoweredOn));
        assert!(h.mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_resetting_drops_link_without_error() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        discover_gatt(&mut h, &target.handle);
        h.drain();

        h.controller
            .handle_transport_event(TransportEvent::RadioStateChanged(RadioState::Resetting));

        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert!(h.controller.gatt().is_empty());
        assert!(h.controller.active_peripheral().is_none());
        assert!(!h.controller.monitor().is_running());
        assert!(!h.controller.timers().is_armed(TimerKind::RssiPoll));
        assert_eq!(
            h.drain(),
            vec![SessionEvent::StateChanged(ConnectionState::Disconnected)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_off_defers_pending_reconnect() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        h.controller
            .handle_transport_event(TransportEvent::Disconnected {
                peripheral: target.handle.clone(),
                cause: Some(TransportError::new("link loss")),
            });
        assert!(h.controller.timers().is_armed(TimerKind::Reconnect));

        h.controller
            .handle_transport_event(TransportEvent::RadioStateChanged(RadioState::PoweredOff));
        assert!(!h.controller.timers().is_armed(TimerKind::Reconnect));

        time::sleep(Duration::from_secs(5)).await;
        while let Ok(fired) = h.timer_rx.try_recv() {
            h.controller.handle_timer(fired);
        }
        assert_eq!(h.connect_count(), 1);
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);

        h.controller
            .handle_transport_event(TransportEvent::RadioStateChanged(RadioState::PoweredOn));
        assert_eq!(h.connect_count(), 2);
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_restores_link_regardless_of_auto_reconnect() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);

        h.controller.enter_background();
        h.controller.disconnect();
        h.controller
            .handle_transport_event(TransportEvent::Disconnected {
                peripheral: target.handle.clone(),
                cause: None,
            });
        let before = h.connect_count();

        h.controller.enter_foreground();
        assert_eq!(h.connect_count(), before + 1);
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_with_live_link_keeps_connected() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        h.controller.enter_background();
        h.drain();

        h.controller.enter_foreground();

        assert_eq!(h.connect_count(), 2);
        assert_eq!(h.controller.state(), ConnectionState::Connected);
        assert_eq!(h.controller.active_peripheral(), Some(&target.handle));
        assert!(!h.controller.timers().is_armed(TimerKind::ConnectionTimeout));

        time::sleep(Duration::from_secs(11)).await;
        while let Ok(fired) = h.timer_rx.try_recv() {
            h.controller.handle_timer(fired);
        }
        assert_eq!(h.controller.state(), ConnectionState::Connected);
        assert!(!h.errors().contains(&SessionError::ConnectionTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_without_prior_link_is_noop() {
        let mut h = Harness::new();
        h.controller.connect(device("a", -50));
        h.controller.enter_background();
        let before = h.connect_count();

        h.controller.enter_foreground();
        assert_eq!(h.connect_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gatt_operations_require_connection() {
        let mut h = Harness::new();
        h.controller.read_characteristic(MEASUREMENT);
        h.controller
            .write_characteristic(MEASUREMENT, &[1], WriteMode::WithResponse);
        h.controller.set_notify(MEASUREMENT, true);
        h.controller.read_rssi();

        assert!(h.mock.calls().is_empty());
        assert!(h.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gatt_operations_forward_and_surface_results() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.establish(&target);
        discover_gatt(&mut h, &target.handle);
        let _ = h.mock.take_calls();
        h.drain();

        h.controller.handle_command(Command::ReadCharacteristic(MEASUREMENT));
        h.controller.handle_command(Command::WriteCharacteristic {
            uuid: MEASUREMENT,
            value: vec![0x01],
            mode: WriteMode::WithoutResponse,
        });
        h.controller.handle_command(Command::SetNotify {
            uuid: MEASUREMENT,
            enabled: true,
        });
        h.controller.handle_command(Command::ReadRssi);

        assert_eq!(
            h.mock.calls(),
            vec![
                TransportCall::ReadValue(MEASUREMENT),
                TransportCall::WriteValue {
                    characteristic: MEASUREMENT,
                    value: vec![0x01],
                    mode: WriteMode::WithoutResponse,
                },
                TransportCall::SetNotify {
                    characteristic: MEASUREMENT,
                    enabled: true,
                },
                TransportCall::ReadRssi(target.handle),
            ]
        );

        h.controller.handle_transport_event(TransportEvent::ValueUpdated {
            characteristic: measurement(),
            result: Ok(Some(vec![0x00, 0x48])),
        });
        h.controller.handle_transport_event(TransportEvent::ValueWritten {
            characteristic: measurement(),
            error: Some(TransportError::new("write not permitted")),
        });
        h.controller
            .handle_transport_event(TransportEvent::NotificationStateChanged {
                characteristic: measurement(),
                enabled: true,
                error: None,
            });

        assert_eq!(
            h.drain(),
            vec![
                SessionEvent::ValueUpdated {
                    characteristic: measurement(),
                    value: Some(vec![0x00, 0x48]),
                },
                SessionEvent::Error(SessionError::TransportFailure(TransportError::new(
                    "write not permitted"
                ))),
                SessionEvent::NotificationStateChanged {
                    characteristic: measurement(),
                    enabled: true,
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_connect_supersedes_pending_reconnect() {
        let mut h = Harness::new();
        let first = device("a", -50);
        let second = device("b", -55);
        h.establish(&first);
        h.controller
            .handle_transport_event(TransportEvent::Disconnected {
                peripheral: first.handle,
                cause: Some(TransportError::new("link lost")),
            });
        assert!(h.controller.timers().is_armed(TimerKind::Reconnect));

        h.controller.connect(second.clone());

        assert!(!h.controller.timers().is_armed(TimerKind::Reconnect));
        assert_eq!(h.controller.reconnect_target(), Some(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_reconnect_survives_when_not_cancellable() {
        let mut h = Harness::with_config(SessionConfig {
            cancel_pending_reconnect: false,
            ..SessionConfig::default()
        });
        let target = device("a", -50);
        h.establish(&target);
        h.controller
            .handle_transport_event(TransportEvent::Disconnected {
                peripheral: target.handle,
                cause: Some(TransportError::new("link lost")),
            });

        h.controller.disconnect();
        assert!(h.controller.timers().is_armed(TimerKind::Reconnect));

        let fired = h.next_timer().await;
        assert_eq!(fired.kind, TimerKind::Reconnect);
        h.controller.handle_timer(fired);
        assert_eq!(h.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_reported_without_retry() {
        let mut h = Harness::new();
        let target = device("a", -50);
        h.controller.connect(target.clone());
        h.drain();

        h.controller
            .handle_transport_event(TransportEvent::ConnectFailed {
                peripheral: target.handle.clone(),
                cause: None,
            });

        assert_eq!(
            h.errors(),
            vec![SessionError::ConnectFailed {
                cause: TransportError::unknown()
            }]
        );
        assert_eq!(h.controller.reconnect_target(), Some(&target));
        assert!(h.controller.timers().is_armed(TimerKind::ConnectionTimeout));
        assert_eq!(h.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_is_ignored() {
        let mut h = Harness::new();
        h.controller.connect(device("a", -50));
        h.drain();

        h.controller.handle_timer(TimerFired {
            kind: TimerKind::ConnectionTimeout,
            generation: 999,
        });

        assert!(h.drain().is_empty());
        assert!(h.controller.timers().is_armed(TimerKind::ConnectionTimeout));
    }
}
