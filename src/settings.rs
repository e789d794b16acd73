//! Runtime tunables
//!
//! The firmware runs on [`BridgeSettings::default`]. The host console reads
//! overrides from a RON file; any field left out keeps its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    /// Commands the queue holds before `post` starts failing.
    pub queue_capacity: usize,
    /// How long a producer waits for room in a full queue.
    pub post_timeout_ms: u64,
    /// Delay between notification chunks.
    pub chunk_pacing_ms: u64,
    /// Age after which cached scan results are thrown away.
    pub scan_ttl_ms: u64,
    pub max_networks: usize,
    /// Time between the reset/restart reply and the reboot.
    pub restart_grace_ms: u64,
    pub default_device_name: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            post_timeout_ms: 100,
            chunk_pacing_ms: 20,
            scan_ttl_ms: 30_000,
            max_networks: 5,
            restart_grace_ms: 500,
            default_device_name: "ESP32-BLE".to_string(),
        }
    }
}

impl BridgeSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn from_ron(text: &str) -> Result<Self, SettingsError> {
        Ok(ron::from_str(text)?)
    }

    pub fn post_timeout(&self) -> Duration {
        Duration::from_millis(self.post_timeout_ms)
    }

    pub fn chunk_pacing(&self) -> Duration {
        Duration::from_millis(self.chunk_pacing_ms)
    }

    pub fn scan_ttl(&self) -> Duration {
        Duration::from_millis(self.scan_ttl_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }

    /// Same settings with every delay removed. Used by tests and the
    /// simulator where real pacing only slows things down.
    pub fn without_delays(mut self) -> Self {
        self.post_timeout_ms = 0;
        self.chunk_pacing_ms = 0;
        self.restart_grace_ms = 0;
        self
    }
}
