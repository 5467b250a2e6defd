//! # gattlink-core
//!
//! Central-role Bluetooth Low Energy session control.
//!
//! This crate provides:
//! - Peripheral discovery with an RSSI-sorted device registry
//! - Connection lifecycle with timeouts and automatic reconnect
//! - Periodic link RSSI sampling with weak-signal detection
//! - A per-connection cache of discovered services and characteristics
//! - Characteristic read, write and notification control
//!
//! ## Architecture
//!
//! - [`session`] - The task that owns session state, and the handle callers use
//! - [`controller`] - The connection and session state machine
//! - [`registry`] - Devices seen during the current scan
//! - [`gatt`] - Attribute cache for the connected peripheral
//! - [`monitor`] - RSSI polling and weak-signal classification
//! - [`timer`] - Generation-tagged timers
//! - [`transport`] - The radio capability and its backends
//! - [`events`] - Observer events and their broadcast
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod gatt;
pub mod monitor;
pub mod registry;
pub mod session;
pub mod timer;
pub mod transport;
pub mod types;

pub use config::{
    default_config_path, Config, ConfigError, ConfigResult, ServerConfig, SessionConfig,
};
pub use controller::{Command, SessionController};
pub use error::{GattlinkError, Result, SessionError};
pub use events::{EventPublisher, SessionEvent};
pub use gatt::GattCache;
pub use monitor::{LinkQualityEvent, RssiMonitor};
pub use registry::DeviceRegistry;
pub use session::{Session, SessionHandle};
pub use timer::{TimerFired, TimerKind, Timers};
#[cfg(feature = "bluetooth")]
pub use transport::bluez::BluezTransport;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use transport::mock::{MockDevice, MockService, MockTransport, TransportCall};
pub use transport::{
    ConnectOptions, Transport, TransportError, TransportEvent, TransportEvents,
};
pub use types::{
    Characteristic, CharacteristicProperties, ConnectionState, Device, DeviceId,
    PeripheralHandle, RadioState, Service, WriteMode, UNKNOWN_DEVICE_NAME,
};
