//! `alert_condition.yml`: per-model default alert rules with
//! per-instance opt-out and additions.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use talos_domain_models::AlertRule;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AlertInstanceConfig {
    #[serde(default = "default_true")]
    pub use_default_alerts: bool,
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AlertModelConfig {
    #[serde(default)]
    pub default_alerts: Vec<AlertRule>,
    #[serde(default)]
    pub instances: HashMap<String, AlertInstanceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AlertConditionFile {
    #[serde(flatten)]
    pub models: HashMap<String, AlertModelConfig>,
}

impl AlertConditionFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    /// Resolves the alert rules that apply to one device instance: the
    /// model's defaults (unless opted out), plus the instance's own rules.
    /// Duplicate codes keep the instance-specific rule and are logged.
    pub fn resolve_for(&self, model: &str, slave_id: &str) -> Vec<AlertRule> {
        let Some(model_config) = self.models.get(model) else { return Vec::new() };
        let instance = model_config.instances.get(slave_id);
        let use_defaults = instance.map(|i| i.use_default_alerts).unwrap_or(true);

        let mut by_code: HashMap<String, AlertRule> = HashMap::new();
        if use_defaults {
            for rule in &model_config.default_alerts {
                by_code.insert(rule.code.clone(), rule.clone());
            }
        }
        if let Some(instance) = instance {
            for rule in &instance.alerts {
                if by_code.insert(rule.code.clone(), rule.clone()).is_some() {
                    tracing::debug!(model, slave_id, code = %rule.code, "instance alert overrides model default with same code");
                }
            }
        }
        by_code.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_rule_overrides_default_with_same_code() {
        let yaml = r#"
TECO_VFD:
  default_alerts:
    - code: OVERTEMP
      name: Overtemperature
      sources: [TEMP]
      type: threshold
      operator: gt
      threshold: 80
      min: null
      max: null
      severity: WARNING
      composite: null
  instances:
    "2":
      use_default_alerts: true
      alerts:
        - code: OVERTEMP
          name: Overtemperature (tight)
          sources: [TEMP]
          type: threshold
          operator: gt
          threshold: 70
          min: null
          max: null
          severity: CRITICAL
          composite: null
"#;
        let file: AlertConditionFile = serde_yaml::from_str(yaml).unwrap();
        let rules = file.resolve_for("TECO_VFD", "2");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].threshold, Some(70.0));
    }

    #[test]
    fn opting_out_of_defaults_drops_model_rules() {
        let yaml = r#"
TECO_VFD:
  default_alerts:
    - code: OVERTEMP
      name: Overtemperature
      sources: [TEMP]
      type: threshold
      operator: gt
      threshold: 80
      min: null
      max: null
      severity: WARNING
      composite: null
  instances:
    "2":
      use_default_alerts: false
      alerts: []
"#;
        let file: AlertConditionFile = serde_yaml::from_str(yaml).unwrap();
        assert!(file.resolve_for("TECO_VFD", "2").is_empty());
    }
}
