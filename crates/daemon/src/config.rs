// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Read from `<state_dir>/config.toml` (or `--config`). Every field has a
//! default, so a missing file yields a working offline-capable daemon
//! pointed at `ws://localhost:7890`:
//!
//! ```toml
//! [remote]
//! url = "wss://sync.example.com"
//! heartbeat_interval_ms = 15000
//!
//! [engine]
//! fan_out = 8
//! default_merge_policy = "field_merge"
//!
//! [engine.collections]
//! profiles = "manual"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use offsync_core::EngineConfig;

use crate::error::{Error, Result};

/// Config filename within the state directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub remote: RemoteConfig,
    pub engine: EngineConfig,
}

/// Where and how to reach the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// WebSocket server URL (`ws://...` or `wss://...`).
    #[serde(default = "default_url")]
    pub url: String,
    /// Heartbeat ping interval in milliseconds (default: 15000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Max time to wait for a pong in milliseconds (default: 5000).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Max time to wait for a connection in seconds (default: 5).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_url() -> String {
    "ws://localhost:7890".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            url: default_url(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl DaemonConfig {
    /// Loads the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(DaemonConfig::default());
        }
        let content = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)
            .map_err(|source| Error::ConfigParse { path: path.to_path_buf(), source })?;
        Ok(config)
    }

    /// Checks values the engine does not check itself.
    pub fn validate(&self) -> Result<()> {
        let url = &self.remote.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::InvalidConfig(format!(
                "remote url '{url}' is not a WebSocket url\n  hint: use ws://host:port or wss://host"
            )));
        }
        if self.remote.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "remote.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.remote.heartbeat_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "remote.heartbeat_timeout_ms must be positive".to_string(),
            ));
        }
        if self.remote.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "remote.connect_timeout_secs must be positive".to_string(),
            ));
        }
        self.engine.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
