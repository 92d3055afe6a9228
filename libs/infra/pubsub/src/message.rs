//! The envelope carried on every topic. A closed tagged variant rather
//! than a dynamically-typed payload.

use talos_domain_models::{ControlAction, Snapshot};

/// Topic name constants.
pub const TOPIC_DEVICE_SNAPSHOT: &str = "DEVICE_SNAPSHOT";
pub const TOPIC_ALERT_WARNING: &str = "ALERT_WARNING";
pub const TOPIC_CONTROL: &str = "CONTROL";

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub device_id: String,
    pub alert_code: String,
    pub severity: talos_domain_models::AlertSeverity,
    pub notification_type: AlertNotificationType,
    pub message: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertNotificationType {
    Triggered,
    Resolved,
}

#[derive(Debug, Clone)]
pub enum BusMessage {
    Snapshot(Snapshot),
    Alert(AlertEvent),
    Control(ControlAction),
}
