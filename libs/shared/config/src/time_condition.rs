//! `time_condition.yml`: a named library of reusable `time_elapsed`
//! leaves (the `TimeElapsed` shape of `CompositeNode`), so alert and
//! control composite trees can reference a schedule by name instead of
//! repeating an `interval_hours` value in every rule. This lets a
//! composite author write `time_condition: daily_maintenance_window`
//! instead of inlining the leaf.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use talos_domain_models::composite::{CompositeNode, Leaf};

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TimeConditionEntry {
    pub interval_hours: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TimeConditionFile {
    #[serde(flatten)]
    pub conditions: HashMap<String, TimeConditionEntry>,
}

impl TimeConditionFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    /// Builds a fresh `time_elapsed` leaf node for a named condition. The
    /// returned node still needs `validate_and_assign_ids` once it's spliced
    /// into the rule tree that references it.
    pub fn resolve(&self, name: &str) -> Option<CompositeNode> {
        let entry = self.conditions.get(name)?;
        Some(CompositeNode::Leaf { id: None, leaf: Leaf::TimeElapsed { interval_hours: entry.interval_hours } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_named_condition_to_time_elapsed_leaf() {
        let yaml = "daily_maintenance_window:\n  interval_hours: 24.0\n";
        let file: TimeConditionFile = serde_yaml::from_str(yaml).unwrap();
        let node = file.resolve("daily_maintenance_window").unwrap();
        match node {
            CompositeNode::Leaf { leaf: Leaf::TimeElapsed { interval_hours }, .. } => {
                assert_eq!(interval_hours, 24.0);
            }
            _ => panic!("expected a time_elapsed leaf"),
        }
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        let file = TimeConditionFile::default();
        assert!(file.resolve("missing").is_none());
    }
}
