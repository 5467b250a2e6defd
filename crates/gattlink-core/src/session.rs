//! The session task and the handle callers hold.
//!
//! [`Session::spawn`] moves a [`SessionController`] onto its own tokio task.
//! The task is the only place session state is touched: commands from any
//! number of [`SessionHandle`] clones, transport events and timer firings
//! are queued and applied one at a time.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::select;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::controller::{Command, SessionController};
use crate::error::{GattlinkError, Result};
use crate::events::{EventPublisher, SessionEvent};
use crate::timer::TimerFired;
use crate::transport::{Transport, TransportEvents};
use crate::types::{ConnectionState, Device, WriteMode};

enum Message {
    Command(Command),
    Shutdown,
}

/// Entry point for running a session.
#[derive(Debug)]
pub struct Session;

impl Session {
    /// Spawn the session task on the current tokio runtime.
    ///
    /// `events` must be the receiver created together with `transport`.
    /// The task runs until [`SessionHandle::shutdown`] is called or every
    /// handle has been dropped.
    pub fn spawn<T: Transport>(
        transport: T,
        events: TransportEvents,
        config: SessionConfig,
    ) -> SessionHandle {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let controller = SessionController::new(transport, config, timer_tx);
        let publisher = controller.publisher().clone();
        let state = controller.watch_state();
        let (tx, rx) = mpsc::unbounded_channel();

        let runner = Runner {
            controller,
            messages: rx,
            transport_events: events,
            timers: timer_rx,
        };
        let task = tokio::spawn(runner.run());

        SessionHandle {
            inner: Arc::new(Inner {
                tx,
                publisher,
                state,
                task: std::sync::Mutex::new(Some(task)),
            }),
        }
    }
}

struct Runner<T: Transport> {
    controller: SessionController<T>,
    messages: mpsc::UnboundedReceiver<Message>,
    transport_events: TransportEvents,
    timers: mpsc::UnboundedReceiver<TimerFired>,
}

impl<T: Transport> Runner<T> {
    async fn run(mut self) {
        info!("session task started");
        let mut transport_open = true;

        loop {
            select! {
                message = self.messages.recv() => match message {
                    Some(Message::Command(command)) => {
                        debug!(?command, "applying command");
                        self.controller.handle_command(command);
                    }
                    Some(Message::Shutdown) | None => break,
                },
                event = self.transport_events.recv(), if transport_open => match event {
                    Some(event) => self.controller.handle_transport_event(event),
                    None => {
                        info!("transport event channel closed");
                        transport_open = false;
                    }
                },
                Some(fired) = self.timers.recv() => self.controller.handle_timer(fired),
            }
        }

        self.controller.shutdown();
    }
}

struct Inner {
    tx: mpsc::UnboundedSender<Message>,
    publisher: EventPublisher,
    state: watch::Receiver<ConnectionState>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to a running session.
///
/// Every command returns as soon as it is queued. Outcomes are delivered
/// to observers as [`SessionEvent`]s. A command fails only with
/// [`GattlinkError::SessionClosed`] once the session task has stopped.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .tx
            .send(Message::Command(command))
            .map_err(|_| GattlinkError::SessionClosed)
    }

    /// Clear the device list and start scanning.
    pub fn start_scan(&self) -> Result<()> {
        self.send(Command::StartScan)
    }

    /// Stop scanning.
    pub fn stop_scan(&self) -> Result<()> {
        self.send(Command::StopScan)
    }

    /// Connect to `device`. It becomes the reconnect target.
    pub fn connect(&self, device: Device) -> Result<()> {
        self.send(Command::Connect(device))
    }

    /// Disconnect and disable auto-reconnect.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Sample the link RSSI once.
    pub fn read_rssi(&self) -> Result<()> {
        self.send(Command::ReadRssi)
    }

    /// Read a characteristic of the connected peripheral.
    pub fn read_characteristic(&self, uuid: Uuid) -> Result<()> {
        self.send(Command::ReadCharacteristic(uuid))
    }

    /// Write a characteristic of the connected peripheral.
    pub fn write_characteristic(&self, uuid: Uuid, value: Vec<u8>, mode: WriteMode) -> Result<()> {
        self.send(Command::WriteCharacteristic { uuid, value, mode })
    }

    /// Enable or disable notifications on a characteristic.
    pub fn set_notify(&self, uuid: Uuid, enabled: bool) -> Result<()> {
        self.send(Command::SetNotify { uuid, enabled })
    }

    /// Report that the host application moved to the background.
    pub fn enter_background(&self) -> Result<()> {
        self.send(Command::EnterBackground)
    }

    /// Report that the host application returned to the foreground.
    pub fn enter_foreground(&self) -> Result<()> {
        self.send(Command::EnterForeground)
    }

    /// Attach an observer. It receives every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.publisher.subscribe()
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.publisher.observer_count()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Follow connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Whether the session task is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inner.tx.is_closed()
    }

    /// Stop the session: discovery, monitoring and timers are cancelled and
    /// the active link is dropped. Waits for the task to finish.
    pub async fn shutdown(&self) {
        let _ = self.inner.tx.send(Message::Shutdown);
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("observers", &self.observer_count())
            .field("running", &self.is_running())
            .finish()
    }
}
