//! Core configuration types.
//!
//! [`Config`] is the single source of truth for runtime parameters; the
//! server binary is responsible for assembling it from defaults, an optional
//! YAML file, environment variables, and CLI flags, in that precedence order
//! (see `apps/server/src/config.rs`). The core library only knows about the
//! assembled, validated result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default SlimProto command port.
pub const DEFAULT_SLIMPROTO_PORT: u16 = 3483;
/// Default HTTP audio streaming port.
pub const DEFAULT_HTTP_PORT: u16 = 9000;
/// Default maximum number of simultaneously connected clients.
pub const DEFAULT_MAX_CLIENTS: usize = 10;
/// Default ring buffer capacity, in chunks, per capture pipeline.
pub const DEFAULT_RING_BUFFER_CAPACITY: usize = 64;

/// Runtime configuration for the SlimStreamer server.
///
/// All fields have sensible defaults; every field is independently
/// overridable via the config file, environment, or CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of simultaneously connected SlimProto clients.
    pub max_clients: usize,

    /// TCP port the SlimProto command session listener binds to.
    pub slimproto_port: u16,

    /// TCP port the HTTP audio streaming listener binds to.
    pub http_port: u16,

    /// Capacity, in chunks, of each capture pipeline's ring buffer.
    pub ring_buffer_capacity: usize,

    /// Capture device table: sampling rate (Hz) -> ALSA device string.
    ///
    /// Only rates present here have a capture pipeline; a chunk whose rate is
    /// not in this table cannot be produced in the first place.
    pub capture_devices: BTreeMap<u32, String>,

    /// Log verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    ///
    /// Lives here rather than only as a CLI flag so a config file alone is
    /// enough to change it; the binary still lets `SLIMSTREAMER_LOG_LEVEL`
    /// and `--log-level` override it, in that order of increasing priority.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let mut capture_devices = BTreeMap::new();
        capture_devices.insert(44_100, "hw:1,1,0".to_string());
        capture_devices.insert(48_000, "hw:1,1,1".to_string());

        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            slimproto_port: DEFAULT_SLIMPROTO_PORT,
            http_port: DEFAULT_HTTP_PORT,
            ring_buffer_capacity: DEFAULT_RING_BUFFER_CAPACITY,
            capture_devices,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Validates the configuration, returning a descriptive error for the
    /// first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be >= 1".to_string()));
        }
        if self.ring_buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ring_buffer_capacity must be >= 1".to_string(),
            ));
        }
        if self.slimproto_port == self.http_port {
            return Err(ConfigError::Invalid(
                "slimproto_port and http_port must differ".to_string(),
            ));
        }
        if self.capture_devices.is_empty() {
            return Err(ConfigError::Invalid(
                "capture_devices must map at least one sampling rate to a device".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_clients() {
        let mut config = Config::default();
        config.max_clients = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_colliding_ports() {
        let mut config = Config::default();
        config.http_port = config.slimproto_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_capture_device_table() {
        let mut config = Config::default();
        config.capture_devices.clear();
        assert!(config.validate().is_err());
    }
}
