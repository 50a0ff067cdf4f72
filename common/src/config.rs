use serde::{Deserialize, Serialize};

use crate::{history::DEFAULT_HISTORY_CAPACITY, settings::Settings, sunset::Location};

pub const MAX_HISTORY_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub history_capacity: usize,
    pub history_flush_interval_ms: u64,
    pub auto_refresh_sunset: bool,
    pub max_payload_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_flush_interval_ms: 30_000,
            auto_refresh_sunset: false,
            max_payload_bytes: 512,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.history_capacity = self.history_capacity.clamp(1, MAX_HISTORY_CAPACITY);
        self.history_flush_interval_ms = self.history_flush_interval_ms.clamp(1_000, 3_600_000);
        self.max_payload_bytes = self.max_payload_bytes.clamp(64, 16_384);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_enabled: true,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        self.location.sanitize();
        self.settings.sanitize();
        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = NetworkConfig::default().mqtt_port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let raw = r#"{
            "location": {"latitude": 51.5, "longitude": -0.12, "timezone": "Europe/London"}
        }"#;
        let mut runtime: RuntimeConfig = serde_json::from_str(raw).unwrap();
        runtime.sanitize();

        assert_eq!(runtime.location.timezone, "Europe/London");
        assert_eq!(runtime.controller.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(runtime.settings, Settings::default());
        assert_eq!(runtime.network.mqtt_port, 1883);
    }

    #[test]
    fn sanitize_clamps_controller_limits() {
        let mut runtime = RuntimeConfig::default();
        runtime.controller.history_capacity = 0;
        runtime.controller.history_flush_interval_ms = 5;
        runtime.network.mqtt_port = 0;
        runtime.sanitize();

        assert_eq!(runtime.controller.history_capacity, 1);
        assert_eq!(runtime.controller.history_flush_interval_ms, 1_000);
        assert_eq!(runtime.network.mqtt_port, 1883);
    }
}
