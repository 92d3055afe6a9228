//! Device identity and instance configuration.

use crate::constraint::ConstraintPolicy;
use crate::register::RegisterMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `MODEL_SLAVE`, e.g. `TECO_VFD_2`. Parsed by splitting on the *last* `_`,
/// since a model name may itself contain underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(model: &str, slave_id: &str) -> Self {
        Self(format!("{model}_{slave_id}"))
    }

    /// Splits on the last `_`. Returns `None` if there is no `_` at all.
    pub fn split(&self) -> Option<(&str, &str)> {
        let idx = self.0.rfind('_')?;
        Some((&self.0[..idx], &self.0[idx + 1..]))
    }

    pub fn model(&self) -> Option<&str> {
        self.split().map(|(m, _)| m)
    }

    pub fn slave_id(&self) -> Option<&str> {
        self.split().map(|(_, s)| s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-serial-port settings shared by every device on that bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSettings {
    pub port: String,
    pub baudrate: u32,
    #[serde(default = "BusSettings::default_timeout_sec")]
    pub timeout_sec: f64,
}

impl BusSettings {
    fn default_timeout_sec() -> f64 {
        1.0
    }
}

/// Rewrite for `turn_on`/`turn_off` on devices without a native on/off
/// register: write one or more discrete-output targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnOffBinding {
    pub targets: Vec<String>,
    pub on: i64,
    pub off: i64,
}

/// A live device instance, created at startup from merged config and torn
/// down at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInstance {
    pub device_id: DeviceId,
    pub model: String,
    pub slave_id: String,
    pub device_type: String,
    pub port: String,
    pub bus: BusSettings,
    pub register_map: RegisterMap,
    pub constraint_policy: ConstraintPolicy,
    pub on_off_binding: Option<OnOffBinding>,
}

impl DeviceInstance {
    pub fn supports_on_off(&self) -> bool {
        self.register_map.contains_case_insensitive("ON_OFF")
            || self.register_map.contains_case_insensitive("RW_ON_OFF")
    }
}
