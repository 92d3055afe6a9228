//! `system_config.yml`: gateway identity and the concurrency/timeout
//! knobs for the device monitor.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub gateway_id: String,
    pub poll_interval_sec: f64,
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
    pub device_timeout_sec: f64,
    #[serde(default = "default_shutdown_drain_timeout_sec")]
    pub shutdown_drain_timeout_sec: f64,
    #[serde(default = "default_drop_metrics_window_sec")]
    pub drop_metrics_window_sec: u64,
    /// Subscriber Registry's bool map of enabled consumer names. Absent
    /// entries default to enabled.
    #[serde(default)]
    pub enabled_subscribers: HashMap<String, bool>,
}

impl SystemConfig {
    pub fn is_subscriber_enabled(&self, name: &str) -> bool {
        self.enabled_subscribers.get(name).copied().unwrap_or(true)
    }
}

fn default_read_concurrency() -> usize {
    8
}

fn default_shutdown_drain_timeout_sec() -> f64 {
    5.0
}

fn default_drop_metrics_window_sec() -> u64 {
    60
}

impl SystemConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_concurrency_default() {
        let yaml = r#"
gateway_id: GATEWAY0001
poll_interval_sec: 5
device_timeout_sec: 2.0
"#;
        let config: SystemConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.read_concurrency, 8);
    }
}
