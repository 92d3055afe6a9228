//! `notifier_config.yml`: notifier definitions, severity-keyed
//! routing rules, and retry tuning.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use talos_domain_models::AlertSeverity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierMode {
    Broadcast,
    Fallback,
    Single,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierSpec {
    Webhook { url: String },
    Sms { to: String },
    Email { to: String },
    Log,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingRule {
    pub mode: NotifierMode,
    pub notifiers: Vec<String>,
    #[serde(default = "default_min_success")]
    pub min_success: u32,
}

fn default_min_success() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub base_sec: f64,
    pub multiplier: f64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    pub notifiers: HashMap<String, NotifierSpec>,
    pub routing: HashMap<String, RoutingRule>,
    pub retry: RetryPolicy,
}

impl NotifierConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    /// Looks up the routing rule for a severity by its upper-case spelling
    /// (`AlertSeverity` serializes the same way), e.g. `WARNING`.
    pub fn routing_for(&self, severity: AlertSeverity) -> Option<&RoutingRule> {
        let key = match severity {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        };
        self.routing.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_routing_and_resolves_by_severity() {
        let yaml = r#"
notifiers:
  slack_ops:
    kind: webhook
    url: https://hooks.slack.example.com/x
  sms_oncall:
    kind: sms
    to: "+15551234567"
routing:
  WARNING:
    mode: broadcast
    notifiers: [slack_ops]
  CRITICAL:
    mode: fallback
    notifiers: [sms_oncall, slack_ops]
    min_success: 1
retry:
  base_sec: 1.0
  multiplier: 2.0
  max_attempts: 3
"#;
        let config: NotifierConfig = serde_yaml::from_str(yaml).unwrap();
        let critical = config.routing_for(AlertSeverity::Critical).unwrap();
        assert_eq!(critical.mode, NotifierMode::Fallback);
        assert_eq!(critical.notifiers, vec!["sms_oncall".to_string(), "slack_ops".to_string()]);
        assert!(config.routing_for(AlertSeverity::Info).is_none());
    }
}
