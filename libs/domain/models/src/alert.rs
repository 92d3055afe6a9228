//! Legacy type-based alert rules and the alert state machine.

use crate::composite::{ConditionOperator, CompositeNode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Threshold,
    Average,
    Sum,
    Min,
    Max,
}

impl AlertType {
    /// `average`/`sum`/`min`/`max` require at least two sources.
    pub fn requires_multiple_sources(self) -> bool {
        !matches!(self, AlertType::Threshold)
    }
}

/// A legacy type-based rule, or (when `composite` is set) a composite-path
/// rule reusing the same evaluator. Both flow through the same state
/// manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub code: String,
    pub name: String,
    pub sources: Vec<String>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub operator: ConditionOperator,
    pub threshold: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub severity: AlertSeverity,
    /// Present iff this rule uses the composite path instead of the legacy
    /// type/operator/threshold path.
    pub composite: Option<CompositeNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertState {
    Normal,
    Triggered,
    Active,
    Resolved,
}

/// One row per `(device_id, alert_code)` while state != Normal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStateRecord {
    pub state: AlertState,
    pub severity: AlertSeverity,
    pub triggered_at: Option<i64>,
    pub resolved_at: Option<i64>,
    pub last_value: Option<f64>,
}
