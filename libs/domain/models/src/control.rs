//! Control rules, policy transforms, and control actions.

use crate::composite::CompositeNode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlActionType {
    TurnOn,
    TurnOff,
    SetFrequency,
    AdjustFrequency,
    WriteDo,
    Reset,
}

/// Policy transforms applied to a matched rule's actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Policy {
    DiscreteSetpoint,
    AbsoluteLinear {
        source: String,
        base_freq: f64,
        base_temp: f64,
        gain: f64,
        deadband: Option<f64>,
    },
    IncrementalLinear {
        /// Either a single source (absolute value) or a difference pair,
        /// matching the composite's own `threshold`/`difference` shape.
        source: Option<String>,
        sources: Option<[String; 2]>,
        gain: f64,
        deadband: f64,
        max_step: Option<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRule {
    pub code: String,
    /// Lower = higher priority.
    pub priority: i32,
    pub composite: CompositeNode,
    pub policy: Option<Policy>,
    pub actions: Vec<ControlAction>,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlAction {
    pub model: String,
    pub slave_id: String,
    #[serde(rename = "type")]
    pub action_type: ControlActionType,
    pub target: Option<String>,
    pub value: Option<f64>,
    pub priority: i32,
    pub reason: String,
    /// Caller intent: bypass the constraint policy for this write if it
    /// would otherwise be rejected. Rare; set on rules like an emergency
    /// `reset` that must reach the device regardless of its normal bounds.
    #[serde(default)]
    pub force: bool,
    /// Set by the executor when a constraint violation was overridden
    /// because `force` was set. Distinct from `force`: this reflects what
    /// actually happened, not what was requested.
    #[serde(default)]
    pub was_forced: bool,
}

impl ControlAction {
    /// Default register target per action type.
    pub fn default_target(action_type: ControlActionType) -> Option<&'static str> {
        match action_type {
            ControlActionType::SetFrequency | ControlActionType::AdjustFrequency => Some("RW_HZ"),
            ControlActionType::WriteDo => Some("RW_DO"),
            ControlActionType::Reset => Some("RW_RESET"),
            ControlActionType::TurnOn | ControlActionType::TurnOff => None,
        }
    }

    pub fn resolved_target(&self) -> Option<String> {
        self.target
            .clone()
            .or_else(|| Self::default_target(self.action_type).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_targets_match_spec_table() {
        assert_eq!(ControlAction::default_target(ControlActionType::SetFrequency), Some("RW_HZ"));
        assert_eq!(ControlAction::default_target(ControlActionType::AdjustFrequency), Some("RW_HZ"));
        assert_eq!(ControlAction::default_target(ControlActionType::WriteDo), Some("RW_DO"));
        assert_eq!(ControlAction::default_target(ControlActionType::Reset), Some("RW_RESET"));
        assert_eq!(ControlAction::default_target(ControlActionType::TurnOn), None);
    }
}
