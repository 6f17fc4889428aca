// Copyright 2026 ThermoLink Team
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
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Ingestion server settings.
    pub server: ServerSection,

    /// Restart supervision settings.
    pub reconnect: ReconnectSection,

    /// Bluetooth settings.
    pub bluetooth: BluetoothSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Port tried first when starting the server.
    pub preferred_port: u16,

    /// Alternate ports probed in order when the preferred one is occupied.
    pub fallback_ports: Vec<u16>,

    /// Delay after each port probe release, for OS socket teardown.
    pub probe_settle_ms: u64,

    /// How long connections get to close cleanly on stop.
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSection {
    /// Delay between supervised restart attempts.
    pub restart_delay_secs: u64,

    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothSection {
    /// Scan window length.
    pub scan_duration_ms: u64,

    /// GATT connect timeout.
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("thermolink"),
            server: ServerSection {
                preferred_port: 8080,
                fallback_ports: crate::telemetry::DEFAULT_FALLBACK_PORTS.to_vec(),
                probe_settle_ms: 250,
                shutdown_grace_ms: 3000,
            },
            reconnect: ReconnectSection {
                restart_delay_secs: 5,
                max_attempts: 5,
            },
            bluetooth: BluetoothSection {
                scan_duration_ms: 10_000,
                connect_timeout_ms: 15_000,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thermolink");

        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        // Set data directory
        config.data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thermolink");
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thermolink");

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    /// Server settings in the ingestion server's own config type.
    pub fn server_config(&self) -> crate::telemetry::ServerConfig {
        crate::telemetry::ServerConfig {
            fallback_ports: self.server.fallback_ports.clone(),
            probe_settle: Duration::from_millis(self.server.probe_settle_ms),
            shutdown_grace: Duration::from_millis(self.server.shutdown_grace_ms),
        }
    }

    /// Restart policy for the supervisor.
    pub fn restart_policy(&self) -> crate::telemetry::RestartPolicy {
        crate::telemetry::RestartPolicy {
            delay: Duration::from_secs(self.reconnect.restart_delay_secs),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.bluetooth.scan_duration_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.bluetooth.connect_timeout_ms)
    }
}
