//! Client configuration.
//!
//! Built-in defaults, overlaid by `config.yaml` in the config directory,
//! overlaid by command-line flags in `main`. The directory also remembers
//! the last target used.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CliError, Result};
use crate::session::SessionConfig;

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "MCCLI_CONFIG_DIR";

const CONFIG_FILE: &str = "config.yaml";
const ADDRESS_FILE: &str = "default_address";

/// Tunables read from `config.yaml`. Missing keys keep their default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wait for a direct reply.
    pub reply_timeout_ms: u64,
    /// Default for `wait_msg`, `wait_ack` without a hint, `wait_status`.
    pub wait_timeout_ms: u64,
    /// Login wait when the radio gives no estimate.
    pub login_timeout_ms: u64,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// TCP port used when the target names only a host.
    pub tcp_port: u16,
    /// Serial baud rate.
    pub baudrate: u32,
    /// How long unclaimed acks and signals stay claimable.
    pub backlog_ttl_ms: u64,
    /// Reconnects tried after the link drops.
    pub reconnect_attempts: u32,
    /// Age under which cached clock and battery readings are served.
    pub cache_ttl_ms: u64,
    /// ANSI colors in message output.
    pub color: bool,
    /// Show SNR next to received messages.
    pub print_snr: bool,
    /// Print received messages as JSON.
    pub json_msgs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reply_timeout_ms: 5000,
            wait_timeout_ms: 5000,
            login_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            tcp_port: 5000,
            baudrate: 115_200,
            backlog_ttl_ms: 30_000,
            reconnect_attempts: 1,
            cache_ttl_ms: 60_000,
            color: true,
            print_snr: false,
            json_msgs: false,
        }
    }
}

impl Config {
    /// Load `config.yaml` from `dir`, or defaults when it does not exist.
    pub fn load(dir: &Path) -> Result<Config> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| CliError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| CliError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Like [`load`](Self::load), but falls back to defaults on error.
    pub fn load_or_default(dir: Option<&Path>) -> Config {
        let Some(dir) = dir else {
            return Config::default();
        };
        match Config::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Config::default()
            }
        }
    }

    /// Session tuning derived from this config.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            login_timeout: Duration::from_millis(self.login_timeout_ms),
            reconnect_attempts: self.reconnect_attempts,
            backlog_ttl: Duration::from_millis(self.backlog_ttl_ms),
            ..SessionConfig::default()
        }
    }

    /// Default wait for event-driven commands.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Freshness bound for cached clock and battery.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// `$MCCLI_CONFIG_DIR`, else `$HOME/.config/meshcore`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("meshcore"))
}

/// Last target used, if remembered.
pub fn load_default_address(dir: &Path) -> Option<String> {
    let address = fs::read_to_string(dir.join(ADDRESS_FILE)).ok()?;
    let address = address.trim();
    (!address.is_empty()).then(|| address.to_string())
}

/// Remember `address` for the next run. Only writes when the config
/// directory already exists; returns whether it wrote.
pub fn save_default_address(dir: &Path, address: &str) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let path = dir.join(ADDRESS_FILE);
    fs::write(&path, address)
        .map_err(|e| CliError::Config(format!("failed to write {}: {}", path.display(), e)))?;
    Ok(true)
}
