//! Server configuration.
//!
//! Loads a YAML file (if given), then layers environment variable overrides
//! on top, before `main.rs` applies CLI flag overrides (the highest
//! precedence tier) and hands the result to `Config::validate`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use slimstreamer_core::Config;

/// On-disk representation of the config file. Every field is optional so a
/// partial file only overrides what it names; anything missing falls back
/// to `Config::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub max_clients: Option<usize>,
    pub slimproto_port: Option<u16>,
    pub http_port: Option<u16>,
    pub ring_buffer_capacity: Option<usize>,
    pub capture_devices: Option<BTreeMap<u32, String>>,
    pub log_level: Option<String>,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_to(self, config: &mut Config) {
        if let Some(v) = self.max_clients {
            config.max_clients = v;
        }
        if let Some(v) = self.slimproto_port {
            config.slimproto_port = v;
        }
        if let Some(v) = self.http_port {
            config.http_port = v;
        }
        if let Some(v) = self.ring_buffer_capacity {
            config.ring_buffer_capacity = v;
        }
        if let Some(v) = self.capture_devices {
            config.capture_devices = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
    }
}

/// Environment variable overrides, applied after the config file.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SLIMSTREAMER_MAX_CLIENTS") {
        if let Ok(v) = val.parse() {
            config.max_clients = v;
        }
    }
    if let Ok(val) = std::env::var("SLIMSTREAMER_SLIMPROTO_PORT") {
        if let Ok(v) = val.parse() {
            config.slimproto_port = v;
        }
    }
    if let Ok(val) = std::env::var("SLIMSTREAMER_HTTP_PORT") {
        if let Ok(v) = val.parse() {
            config.http_port = v;
        }
    }
    if let Ok(val) = std::env::var("SLIMSTREAMER_LOG_LEVEL") {
        config.log_level = val;
    }
}

/// Builds a [`Config`] from defaults, an optional YAML file, and the
/// environment. CLI flags are applied by the caller afterward, since they
/// need the already-parsed `clap::Args`.
pub fn load(config_path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(path) = config_path {
        ConfigFile::load(path)?.apply_to(&mut config);
    }

    apply_env_overrides(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_a_config_file_returns_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.slimproto_port, Config::default().slimproto_port);
    }

    #[test]
    fn env_override_takes_precedence_over_defaults() {
        std::env::set_var("SLIMSTREAMER_HTTP_PORT", "9999");
        let config = load(None).unwrap();
        std::env::remove_var("SLIMSTREAMER_HTTP_PORT");
        assert_eq!(config.http_port, 9999);
    }
}
