//! `device_instance_config.yml`: global defaults, per-model default
//! constraints/initialization, and per-instance overrides (constraints,
//! initialization, pin overrides, on/off binding).

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use talos_domain_models::{Bound, ConstraintPolicy, OnOffBinding, RegisterMap};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GlobalDefaults {
    #[serde(default)]
    pub constraints: HashMap<String, Bound>,
}

/// A single register's overrides for one device instance, under
/// `instances: {slave_id -> {..., pins (overrides)}}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PinOverride {
    pub offset: Option<u32>,
    pub scale: Option<f64>,
    pub offset_value: Option<f64>,
    pub precision: Option<u32>,
    pub readable: Option<bool>,
    pub writable: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InstanceOverrides {
    #[serde(default)]
    pub constraints: HashMap<String, Bound>,
    #[serde(default)]
    pub initialization: HashMap<String, f64>,
    #[serde(default)]
    pub pins: HashMap<String, PinOverride>,
    pub on_off_binding: Option<OnOffBinding>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ModelDefaults {
    #[serde(default)]
    pub default_constraints: HashMap<String, Bound>,
    #[serde(default)]
    pub initialization: HashMap<String, f64>,
    #[serde(default)]
    pub instances: HashMap<String, InstanceOverrides>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DeviceInstanceConfig {
    #[serde(default)]
    pub global_defaults: GlobalDefaults,
    #[serde(flatten)]
    pub models: HashMap<String, ModelDefaults>,
}

impl DeviceInstanceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    fn model(&self, model: &str) -> Option<&ModelDefaults> {
        self.models.get(model)
    }

    fn instance<'a>(&'a self, model: &str, slave_id: &str) -> Option<&'a InstanceOverrides> {
        self.model(model)?.instances.get(slave_id)
    }

    /// 3-level merge: global defaults -> model defaults -> instance override.
    pub fn resolve_constraints(&self, model: &str, slave_id: &str) -> ConstraintPolicy {
        let mut global = ConstraintPolicy::new();
        for (k, v) in &self.global_defaults.constraints {
            global.set(k.clone(), *v);
        }
        let mut model_policy = ConstraintPolicy::new();
        if let Some(m) = self.model(model) {
            for (k, v) in &m.default_constraints {
                model_policy.set(k.clone(), *v);
            }
        }
        let mut instance_policy = ConstraintPolicy::new();
        if let Some(i) = self.instance(model, slave_id) {
            for (k, v) in &i.constraints {
                instance_policy.set(k.clone(), *v);
            }
        }
        ConstraintPolicy::merge(&global, &model_policy, &instance_policy)
    }

    /// Model-level initialization values overridden by instance-level ones.
    pub fn resolve_initialization(&self, model: &str, slave_id: &str) -> HashMap<String, f64> {
        let mut values = self.model(model).map(|m| m.initialization.clone()).unwrap_or_default();
        if let Some(i) = self.instance(model, slave_id) {
            values.extend(i.initialization.clone());
        }
        values
    }

    pub fn on_off_binding(&self, model: &str, slave_id: &str) -> Option<OnOffBinding> {
        self.instance(model, slave_id)?.on_off_binding.clone()
    }

    /// Applies per-instance pin overrides to a cloned register map.
    pub fn apply_pin_overrides(&self, model: &str, slave_id: &str, register_map: &mut RegisterMap) {
        let Some(instance) = self.instance(model, slave_id) else { return };
        for (pin, over) in &instance.pins {
            let Some(def) = register_map.get(pin).cloned() else { continue };
            let mut updated = def;
            if let Some(v) = over.offset {
                updated.offset = Some(v);
            }
            if let Some(v) = over.scale {
                updated.scale = Some(v);
            }
            if let Some(v) = over.offset_value {
                updated.offset_value = Some(v);
            }
            if let Some(v) = over.precision {
                updated.precision = Some(v);
            }
            if let Some(v) = over.readable {
                updated.readable = v;
            }
            if let Some(v) = over.writable {
                updated.writable = v;
            }
            register_map.insert(updated);
        }
        register_map.reindex();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeviceInstanceConfig {
        let yaml = r#"
global_defaults:
  constraints:
    RW_HZ: {min: 0, max: 60}
TECO_VFD:
  default_constraints:
    RW_HZ: {min: 0, max: 50}
  initialization:
    RW_HZ: 30
  instances:
    "2":
      constraints:
        RW_HZ: {min: 5, max: 45}
      initialization:
        RW_HZ: 35
      pins:
        RW_HZ:
          scale: 0.2
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn resolves_three_level_constraint_merge() {
        let cfg = config();
        let policy = cfg.resolve_constraints("TECO_VFD", "2");
        assert_eq!(policy.bound_for("RW_HZ"), Bound { min: Some(5.0), max: Some(45.0) });
    }

    #[test]
    fn instance_initialization_overrides_model_default() {
        let cfg = config();
        let init = cfg.resolve_initialization("TECO_VFD", "2");
        assert_eq!(init.get("RW_HZ"), Some(&35.0));
    }

    #[test]
    fn pin_override_rewrites_scale() {
        let cfg = config();
        let mut map = RegisterMap::new();
        map.insert(talos_domain_models::RegisterDefinition {
            name: "RW_HZ".into(),
            offset: Some(10),
            format: talos_domain_models::RegisterFormat::U16,
            register_type: talos_domain_models::RegisterKind::Holding,
            readable: true,
            writable: true,
            scale: Some(0.1),
            offset_value: None,
            formula: None,
            precision: None,
            unit: None,
            bit: None,
            composed_of: None,
            scale_from: None,
        });
        cfg.apply_pin_overrides("TECO_VFD", "2", &mut map);
        assert_eq!(map.get("RW_HZ").unwrap().scale, Some(0.2));
    }
}
