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

use crate::bluetooth::constants::link;
use crate::bluetooth::LinkSettings;

const APP_DIR: &str = "spp-link";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Receive path settings.
    pub link: LinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Peer to connect to when none is given on the command line.
    pub address: Option<String>,

    /// Fixed RFCOMM channel. Unset resolves the serial service through SDP.
    pub rfcomm_channel: Option<u8>,

    /// Power the radio on when it is off instead of failing.
    pub enable_radio: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            address: None,
            rfcomm_channel: None,
            enable_radio: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Receive buffer capacity in bytes.
    pub buffer_capacity: usize,

    /// Bytes requested per channel read.
    pub read_chunk_size: usize,

    /// Delimiter wait poll period in milliseconds.
    pub poll_interval_ms: u64,

    /// Retry period in milliseconds when the receive buffer is full.
    pub backpressure_interval_ms: u64,

    /// Frame delimiter.
    pub delimiter: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: link::BUFFER_CAPACITY,
            read_chunk_size: link::READ_CHUNK_SIZE,
            poll_interval_ms: link::POLL_INTERVAL.as_millis() as u64,
            backpressure_interval_ms: link::BACKPRESSURE_INTERVAL.as_millis() as u64,
            delimiter: "\r\n".to_string(),
        }
    }
}

impl From<&Config> for LinkSettings {
    fn from(config: &Config) -> Self {
        Self {
            buffer_capacity: config.link.buffer_capacity,
            read_chunk_size: config.link.read_chunk_size,
            poll_interval: Duration::from_millis(config.link.poll_interval_ms),
            backpressure_interval: Duration::from_millis(config.link.backpressure_interval_ms),
            enable_radio: config.bluetooth.enable_radio,
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

    /// Load configuration from `path`, writing defaults there if it is missing.
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
