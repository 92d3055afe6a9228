//! `control_condition.yml`: per-model default control rules with
//! per-instance opt-out/additions, and the priority conflict resolution
//! applied at config load.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use talos_domain_models::ControlRule;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ControlInstanceConfig {
    #[serde(default = "default_true")]
    pub use_default_controls: bool,
    #[serde(default)]
    pub controls: Vec<ControlRule>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ControlModelConfig {
    #[serde(default)]
    pub default_controls: Vec<ControlRule>,
    #[serde(default)]
    pub instances: HashMap<String, ControlInstanceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ControlConditionFile {
    #[serde(flatten)]
    pub models: HashMap<String, ControlModelConfig>,
}

impl ControlConditionFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    /// Resolves the control rules for one device instance: model defaults
    /// (unless opted out) combined with the instance's own rules, then
    /// grouped by priority keeping the last rule seen at each priority
    /// (instance rules are appended after defaults, so an instance rule wins
    /// a priority collision). Dropped rule codes are returned for the
    /// caller to log.
    pub fn resolve_for(&self, model: &str, slave_id: &str) -> (Vec<ControlRule>, Vec<String>) {
        let Some(model_config) = self.models.get(model) else { return (Vec::new(), Vec::new()) };
        let instance = model_config.instances.get(slave_id);
        let use_defaults = instance.map(|i| i.use_default_controls).unwrap_or(true);

        let defaults = if use_defaults { model_config.default_controls.iter() } else { [].iter() };
        let empty = Vec::new();
        let instance_rules = instance.map(|i| &i.controls).unwrap_or(&empty);

        merge_by_priority(defaults.chain(instance_rules.iter()))
    }
}

fn merge_by_priority<'a>(rules: impl Iterator<Item = &'a ControlRule>) -> (Vec<ControlRule>, Vec<String>) {
    let mut by_priority: BTreeMap<i32, ControlRule> = BTreeMap::new();
    let mut dropped = Vec::new();
    for rule in rules {
        if let Some(previous) = by_priority.insert(rule.priority, rule.clone()) {
            dropped.push(previous.code);
        }
    }
    (by_priority.into_values().collect(), dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use talos_domain_models::composite::{CompositeNode, Leaf};
    use talos_domain_models::ConditionOperator;

    fn rule(code: &str, priority: i32) -> ControlRule {
        ControlRule {
            code: code.into(),
            priority,
            composite: CompositeNode::Leaf {
                id: None,
                leaf: Leaf::Threshold {
                    source: "TEMP".into(),
                    operator: ConditionOperator::Gt,
                    threshold: Some(30.0),
                    min: None,
                    max: None,
                    hysteresis: None,
                    debounce_sec: None,
                    comparison_tolerance: None,
                },
            },
            policy: None,
            actions: Vec::new(),
            blocking: false,
        }
    }

    #[test]
    fn instance_rule_wins_priority_collision_and_default_is_dropped() {
        let mut model_config = ControlModelConfig::default();
        model_config.default_controls.push(rule("DEFAULT_A", 10));
        model_config.instances.insert(
            "2".into(),
            ControlInstanceConfig { use_default_controls: true, controls: vec![rule("OVERRIDE_A", 10)] },
        );
        let mut file = ControlConditionFile::default();
        file.models.insert("TECO_VFD".into(), model_config);

        let (rules, dropped) = file.resolve_for("TECO_VFD", "2");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].code, "OVERRIDE_A");
        assert_eq!(dropped, vec!["DEFAULT_A".to_string()]);
    }

    #[test]
    fn distinct_priorities_both_survive_sorted_ascending() {
        let mut model_config = ControlModelConfig::default();
        model_config.default_controls.push(rule("LOW_PRIORITY", 20));
        model_config.default_controls.push(rule("HIGH_PRIORITY", 5));
        let mut file = ControlConditionFile::default();
        file.models.insert("TECO_VFD".into(), model_config);

        let (rules, dropped) = file.resolve_for("TECO_VFD", "2");
        assert!(dropped.is_empty());
        assert_eq!(rules.iter().map(|r| r.code.as_str()).collect::<Vec<_>>(), vec!["HIGH_PRIORITY", "LOW_PRIORITY"]);
    }
}
