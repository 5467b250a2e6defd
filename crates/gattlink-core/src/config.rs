//! Session and server configuration.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `GATTLINK_*` environment variables (nested keys use `__`, e.g.
//! `GATTLINK_SESSION__CONNECTION_TIMEOUT_SECS=15`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest RSSI threshold accepted by validation.
pub const MIN_RSSI_DBM: i16 = -127;

/// Highest RSSI threshold accepted by validation.
pub const MAX_RSSI_DBM: i16 = 20;

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Writing the file failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A field holds an unusable value.
    #[error("invalid value for '{field}': {message}")]
    Validation {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection and monitoring policy.
    pub session: SessionConfig,
    /// HTTP surface settings.
    pub server: ServerConfig,
}

/// Timing and recovery policy for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds to wait for a connect confirmation before reporting a timeout.
    pub connection_timeout_secs: u64,

    /// Seconds between RSSI samples while connected.
    pub rssi_poll_interval_secs: u64,

    /// Samples strictly below this value raise a weak-signal error.
    pub weak_signal_threshold_dbm: i16,

    /// Seconds to wait before reconnecting after an unexpected disconnect.
    pub reconnect_delay_secs: u64,

    /// Ask the transport to report every advertisement, not only the first.
    pub allow_duplicates: bool,

    /// Cancel the attempt and move to `Disconnected` when the timeout fires.
    pub abort_on_timeout: bool,

    /// Let a manual connect or disconnect invalidate a pending reconnect.
    pub cancel_pending_reconnect: bool,

    /// Capacity of the observer broadcast channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 10,
            rssi_poll_interval_secs: 2,
            weak_signal_threshold_dbm: -85,
            reconnect_delay_secs: 2,
            allow_duplicates: true,
            abort_on_timeout: false,
            cancel_pending_reconnect: true,
            event_buffer: 256,
        }
    }
}

impl SessionConfig {
    /// Connection timeout as a [`Duration`].
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// RSSI polling period as a [`Duration`].
    #[must_use]
    pub const fn rssi_poll_interval(&self) -> Duration {
        Duration::from_secs(self.rssi_poll_interval_secs)
    }

    /// Reconnect delay as a [`Duration`].
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Check every field, reporting the first invalid one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("session.connection_timeout_secs", self.connection_timeout_secs),
            ("session.rssi_poll_interval_secs", self.rssi_poll_interval_secs),
            ("session.reconnect_delay_secs", self.reconnect_delay_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        if self.event_buffer == 0 {
            return Err(invalid(
                "session.event_buffer",
                "must be greater than zero",
            ));
        }

        if !(MIN_RSSI_DBM..=MAX_RSSI_DBM).contains(&self.weak_signal_threshold_dbm) {
            return Err(invalid(
                "session.weak_signal_threshold_dbm",
                &format!("must be between {MIN_RSSI_DBM} and {MAX_RSSI_DBM} dBm"),
            ));
        }

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,

    /// Use production logging (JSON files plus compact stdout).
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            production: false,
        }
    }
}

impl Config {
    /// Load a configuration file, applying environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed or invalid.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::build(Some(path))
    }

    /// Load `path` if it exists, otherwise start from defaults.
    /// Environment overrides apply in both cases.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file is malformed or the result is invalid.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::build(Some(path))
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            Self::build(None)
        }
    }

    /// Write the configuration as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> ConfigResult<()> {
        self.session.validate()?;
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(
                "server.bind_address",
                "must be a socket address such as 0.0.0.0:3000",
            ));
        }
        Ok(())
    }

    fn build(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("GATTLINK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// Default configuration file location.
///
/// On Linux: `/etc/gattlink/config.toml`
/// Elsewhere: the platform config directory, e.g. `~/Library/Application Support/gattlink/`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/gattlink/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "gattlink").map_or_else(
            || PathBuf::from("gattlink.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_reference_timings() {
        let config = SessionConfig::default();
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.rssi_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.weak_signal_threshold_dbm, -85);
        assert!(config.allow_duplicates);
        assert!(!config.abort_on_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = SessionConfig {
            connection_timeout_secs: 0,
            ..SessionConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connection_timeout_secs"));
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let config = SessionConfig {
            weak_signal_threshold_dbm: -200,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_bind_address() {
        let config = Config {
            server: ServerConfig {
                bind_address: "localhost".into(),
                production: false,
            },
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { ref field, .. }) if field == "server.bind_address"
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_then_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.session.connection_timeout_secs = 15;
        config.session.abort_on_timeout = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.session.connection_timeout_secs, 15);
        assert!(loaded.session.abort_on_timeout);
        assert_eq!(loaded.server, ServerConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nreconnect_delay_secs = 5\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.session.reconnect_delay_secs, 5);
        assert_eq!(loaded.session.connection_timeout_secs, 10);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nevent_buffer = 0\n").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Validation { .. })
        ));
    }
}
