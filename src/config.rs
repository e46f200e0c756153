//! Configuration loading and persistence.
//!
//! Handles reading and writing the jobwire configuration file and turning
//! it into the timing knobs the registry runs with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, time::Duration};

use crate::constants::{CONNECT_COOLDOWN, DEFAULT_API_URL, DEFAULT_WS_URL, KEEPALIVE_INTERVAL};
use crate::reconnect::ReconnectPolicy;
use crate::registry::RegistryConfig;
use crate::ws::{http_to_ws_scheme, TungsteniteConnector};

/// Configuration for the jobwire CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// WebSocket gateway; subject ids are appended as query parameters.
    pub ws_url: String,
    /// Base URL of the HTTP API used for status polling.
    pub api_url: String,
    /// Minimum milliseconds between connection attempts per subject.
    pub cooldown_ms: u64,
    /// Seconds between keepalive probes.
    pub keepalive_secs: u64,
    /// Reconnection after abnormal closes.
    pub reconnect: ReconnectPolicy,
    /// Extra headers sent with every WebSocket handshake (e.g. auth).
    pub headers: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            cooldown_ms: u64::try_from(CONNECT_COOLDOWN.as_millis()).unwrap_or(u64::MAX),
            keepalive_secs: KEEPALIVE_INTERVAL.as_secs(),
            reconnect: ReconnectPolicy::default(),
            headers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `JOBWIRE_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir (Linux: ~/.config/jobwire)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("JOBWIRE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("jobwire")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = Self::load_from_path(&path).unwrap_or_else(|e| {
            log::debug!("[Config] Using defaults: {:#}", e);
            Self::default()
        });
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file. Missing fields take their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.ws_url = http_to_ws_scheme(&config.ws_url);
        Ok(config)
    }

    /// Apply `JOBWIRE_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ws_url) = lookup("JOBWIRE_WS_URL") {
            self.ws_url = http_to_ws_scheme(&ws_url);
        }

        if let Some(api_url) = lookup("JOBWIRE_API_URL") {
            self.api_url = api_url;
        }

        if let Some(cooldown) = lookup("JOBWIRE_COOLDOWN_MS") {
            if let Ok(ms) = cooldown.parse::<u64>() {
                self.cooldown_ms = ms;
            }
        }

        if let Some(keepalive) = lookup("JOBWIRE_KEEPALIVE_SECS") {
            if let Ok(secs) = keepalive.parse::<u64>() {
                self.keepalive_secs = secs;
            }
        }
    }

    /// Persists the current configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Timing knobs for [`crate::ConnectionRegistry::new`].
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            cooldown: Duration::from_millis(self.cooldown_ms),
            // A zero interval would make tokio's interval panic
            keepalive_interval: Duration::from_secs(self.keepalive_secs.max(1)),
            reconnect: self.reconnect.clone(),
        }
    }

    /// WebSocket connector carrying the configured handshake headers.
    #[must_use]
    pub fn connector(&self) -> TungsteniteConnector {
        TungsteniteConnector::with_headers(
            self.headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }
}
