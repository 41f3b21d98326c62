//! Engine configuration, layered CLI/env > `config.toml` > built-in default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

use crate::constants::*;

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    port: Option<u16>,
    bind_address: Option<String>,
    interface: Option<String>,
    key_dir: Option<PathBuf>,
    log: Option<String>,
    discovery_timeout_secs: Option<u64>,
    discovery_max_retries: Option<u32>,
    discovery_retry_initial_secs: Option<u64>,
    discovery_retry_max_secs: Option<u64>,
    continuous_discovery_interval_secs: Option<u64>,
    continuous_discovery_timeout_secs: Option<u64>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

/// Runtime configuration for a hub or sensor process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub bind_address: String,
    pub interface: Option<String>,
    pub key_dir: PathBuf,
    pub log: String,
    pub discovery_timeout_secs: u64,
    pub discovery_max_retries: u32,
    pub discovery_retry_initial_secs: u64,
    pub discovery_retry_max_secs: u64,
    pub continuous_discovery_interval_secs: u64,
    pub continuous_discovery_timeout_secs: u64,
}

/// CLI-supplied overrides, passed in from each binary's `clap` args.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub interface: Option<String>,
    pub key_dir: Option<PathBuf>,
    pub log: Option<String>,
}

impl EngineConfig {
    /// Build config from CLI overrides + optional `config.toml` next to the
    /// key directory, falling back to built-in defaults.
    ///
    /// Priority (highest to lowest): CLI / env var, TOML file, default.
    pub fn load(overrides: ConfigOverrides) -> Self {
        let _ = dotenvy::dotenv();

        let key_dir = overrides
            .key_dir
            .or_else(|| std::env::var("SHDC_KEY_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(default_key_dir);

        let toml_path = key_dir.join("config.toml");
        let toml = load_toml(&toml_path).unwrap_or_default();

        let port = overrides
            .port
            .or_else(|| std::env::var("SHDC_PORT").ok().and_then(|s| s.parse().ok()))
            .or(toml.port)
            .unwrap_or(SHDC_PORT);

        let bind_address = std::env::var("SHDC_BIND_ADDRESS")
            .ok()
            .or(toml.bind_address)
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let interface = overrides
            .interface
            .or_else(|| std::env::var("SHDC_INTERFACE").ok())
            .or(toml.interface);

        let log = overrides
            .log
            .or_else(|| std::env::var("SHDC_LOG").ok())
            .or(toml.log)
            .unwrap_or_else(|| "info".to_string());

        Self {
            port,
            bind_address,
            interface,
            key_dir,
            log,
            discovery_timeout_secs: toml.discovery_timeout_secs.unwrap_or(DISCOVERY_TIMEOUT_SECS),
            discovery_max_retries: toml.discovery_max_retries.unwrap_or(DISCOVERY_MAX_ATTEMPTS),
            discovery_retry_initial_secs: toml
                .discovery_retry_initial_secs
                .unwrap_or(DISCOVERY_RETRY_INITIAL_SECS),
            discovery_retry_max_secs: toml.discovery_retry_max_secs.unwrap_or(DISCOVERY_RETRY_MAX_SECS),
            continuous_discovery_interval_secs: toml
                .continuous_discovery_interval_secs
                .unwrap_or(CONTINUOUS_DISCOVERY_INTERVAL_SECS),
            continuous_discovery_timeout_secs: toml
                .continuous_discovery_timeout_secs
                .unwrap_or(CONTINUOUS_DISCOVERY_TIMEOUT_SECS),
        }
    }
}

fn default_key_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("shdc").join("keys");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".shdc").join("keys");
    }
    PathBuf::from(".shdc/keys")
}
