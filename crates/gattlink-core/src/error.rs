//! Error types for the gattlink core library.
//!
//! Two families live here:
//!
//! - [`SessionError`] is the tagged set of asynchronous failures a running
//!   session reports to observers. It is never returned from a command;
//!   it travels inside [`SessionEvent::Error`](crate::SessionEvent::Error).
//! - [`GattlinkError`] is the unified error for synchronous failures
//!   (configuration, backend initialization, a closed session).
//!
//! # Example
//!
//! ```rust
//! use gattlink_core::error::{GattlinkError, Result};
//! use std::path::PathBuf;
//!
//! fn load(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(GattlinkError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::transport::TransportError;

/// Failures reported to session observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A scan was requested while the radio is not powered on.
    #[error("Bluetooth is not powered on. Enable the radio and scan again.")]
    RadioUnavailable,

    /// The radio was switched off; the link is gone until it returns.
    #[error("Bluetooth turned off. The session will reconnect when the radio returns.")]
    RadioOff,

    /// No connect confirmation arrived in time. Advisory only.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// The transport rejected a connection attempt.
    #[error("Failed to connect: {cause}")]
    ConnectFailed {
        /// Platform-reported reason.
        cause: TransportError,
    },

    /// The sampled RSSI is below the weak-signal threshold. The link stays up.
    #[error("Weak Bluetooth signal ({rssi}dBm)")]
    WeakSignal {
        /// Sampled RSSI in dBm.
        rssi: i16,
    },

    /// A discovery, read, write, notify or RSSI request failed.
    #[error("Bluetooth operation failed: {0}")]
    TransportFailure(TransportError),
}

impl SessionError {
    /// Returns `true` for signals that leave the link untouched.
    #[inline]
    #[must_use]
    pub const fn is_advisory(&self) -> bool {
        matches!(self, Self::ConnectionTimeout | Self::WeakSignal { .. })
    }

    /// Machine-readable code for API payloads.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RadioUnavailable => "RADIO_UNAVAILABLE",
            Self::RadioOff => "RADIO_OFF",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ConnectFailed { .. } => "CONNECT_FAILED",
            Self::WeakSignal { .. } => "WEAK_SIGNAL",
            Self::TransportFailure(_) => "TRANSPORT_FAILURE",
        }
    }
}

/// The unified error type for synchronous gattlink operations.
#[derive(Debug, Error)]
pub enum GattlinkError {
    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// The session task has stopped; commands can no longer be delivered.
    #[error("Bluetooth session is closed")]
    SessionClosed,

    /// The Bluetooth backend could not be initialized.
    #[error("Bluetooth backend unavailable: {0}")]
    BluetoothUnavailable(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for gattlink operations.
pub type Result<T> = std::result::Result<T, GattlinkError>;

impl GattlinkError {
    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::ConfigNotFound(_) => 404,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,
            Self::IoError(_) => 500,
            Self::SessionClosed | Self::BluetoothUnavailable(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::SessionClosed => "SESSION_CLOSED",
            Self::BluetoothUnavailable(_) => "BLUETOOTH_UNAVAILABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for GattlinkError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Write { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {source}", path.display()),
            )),
            ConfigError::Validation { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
        }
    }
}
