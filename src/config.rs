//! Configuration loading and persistence.
//!
//! Handles reading and writing the pendant-link configuration file and
//! turning it into a [`ChannelConfig`] for the channel manager.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::channel::ChannelConfig;
use crate::constants::{
    DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_SERVER_URL, DEFAULT_WS_PATH,
    HTTP_REQUEST_TIMEOUT,
};
use crate::ws::endpoint_from_server_url;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the pendant-link client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// HTTP base URL of the control backend.
    pub server_url: String,
    /// Path of the WebSocket route on the backend.
    pub ws_path: String,
    /// Explicit WebSocket URL. Wins over `server_url` + `ws_path`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Automatic reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// First reconnection delay in milliseconds; doubles per attempt.
    pub base_backoff_ms: u64,
    /// Optional cap on any single reconnection delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
    /// Timeout in seconds for REST requests.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            endpoint: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            max_backoff_ms: None,
            request_timeout_secs: HTTP_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `PENDANT_CONFIG_DIR` overrides the platform config dir
    /// (macOS: ~/Library/Application Support/pendant-link).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("PENDANT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("pendant-link")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides. A missing file means defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from `path` without env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    /// Persists the current configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `PENDANT_*` overrides looked up through `var`.
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = var("PENDANT_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(endpoint) = var("PENDANT_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }

        if let Some(value) = parse_var(&var, "PENDANT_MAX_RECONNECT_ATTEMPTS") {
            self.max_reconnect_attempts = value;
        }

        if let Some(value) = parse_var(&var, "PENDANT_BASE_BACKOFF_MS") {
            self.base_backoff_ms = value;
        }

        if let Some(value) = parse_var(&var, "PENDANT_MAX_BACKOFF_MS") {
            self.max_backoff_ms = Some(value);
        }

        if let Some(value) = parse_var(&var, "PENDANT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = value;
        }
    }

    /// Check values that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            anyhow::bail!(
                "server_url must start with http:// or https://, got {:?}",
                self.server_url
            );
        }
        if self.base_backoff_ms == 0 {
            anyhow::bail!("base_backoff_ms must be greater than zero");
        }
        Ok(())
    }

    /// WebSocket URL the channel connects to.
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| endpoint_from_server_url(&self.server_url, &self.ws_path))
    }

    /// Channel settings derived from this config.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            endpoint: self.endpoint(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: self.max_backoff_ms.map(Duration::from_millis),
        }
    }

    /// Timeout for REST requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}
