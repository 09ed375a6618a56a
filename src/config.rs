// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving link settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the user config dir.
const APP_DIR: &str = "spp-link";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Session settings.
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Name prefix of the peripheral to find and connect to.
    pub target_prefix: String,

    /// Adapter name (e.g. "hci0"). The default adapter when unset.
    pub adapter: Option<String>,

    /// RFCOMM channel the peripheral's serial port listens on.
    pub rfcomm_channel: u8,

    /// Length of a discovery scan in seconds.
    pub discovery_timeout_secs: u64,

    /// Power on the adapter when it is off instead of failing.
    pub allow_power_on: bool,

    /// Only discover devices advertising the serial port profile.
    pub filter_spp_uuid: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            target_prefix: "MP4".to_string(),
            adapter: None,
            rfcomm_channel: 1,
            discovery_timeout_secs: 12,
            allow_power_on: true,
            filter_spp_uuid: false,
        }
    }
}

impl BluetoothConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run find-and-connect on startup.
    pub auto_connect: bool,

    /// Appended to every line typed at the console before sending.
    pub line_ending: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            line_ending: "\r\n".to_string(),
        }
    }
}

impl Config {
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bluetooth.target_prefix, "MP4");
        assert_eq!(config.bluetooth.rfcomm_channel, 1);
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\ntarget_prefix = \"HC-05\"\ndiscovery_timeout_secs = 5\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bluetooth.target_prefix, "HC-05");
        assert_eq!(config.bluetooth.discovery_timeout(), Duration::from_secs(5));
        assert!(config.bluetooth.allow_power_on);
        assert_eq!(config.session.line_ending, "\r\n");
    }

    #[test]
    fn test_save_roundtrip_keeps_adapter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.bluetooth.adapter = Some("hci1".to_string());
        config.session.auto_connect = false;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.adapter.as_deref(), Some("hci1"));
        assert!(!loaded.session.auto_connect);
    }
}
