//! Settings management

use std::path::Path;

use firefly_hal::serial::SerialConfig;
use firefly_script::runtime::EngineLimits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interpreter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub serial: SerialConfig,
    pub light: LightSettings,
    pub engine: EngineLimits,
    pub supervisor: SupervisorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightSettings {
    /// Board pin driven by `switch_light`.
    pub pin: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Liveness tick period of the idle loop.
    pub liveness_interval_ms: u64,
    /// Stack size of the receive-consumer thread. Must leave room for the
    /// engine's own stack use during evaluation.
    pub consumer_stack_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            light: LightSettings { pin: 2 },
            engine: EngineLimits::default(),
            supervisor: SupervisorSettings {
                liveness_interval_ms: 1_000,
                consumer_stack_bytes: 1024 * 1024,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load settings from a JSON file, falling back to defaults when the
    /// file does not exist. A malformed file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_serial_parameters() {
        let settings = Settings::default();
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.serial.rx_buffer_len, 2048);
        assert_eq!(settings.serial.event_queue_depth, 20);
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.serial.rx_buffer_len, settings.serial.rx_buffer_len);
        assert_eq!(back.light.pin, settings.light.pin);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings =
            Settings::load_or_default(Path::new("/nonexistent/firefly.json")).unwrap();
        assert_eq!(settings.light.pin, Settings::default().light.pin);
    }
}
