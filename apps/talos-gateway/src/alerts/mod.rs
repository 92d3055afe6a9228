//! Alert Subsystem: legacy type-based aggregation and composite-tree rules,
//! both flowing through one state machine per `(deviceId, alertCode)`.

mod notifier;

use crate::device_table::DeviceTable;
use chrono::Utc;
use notifier::NotifierRouter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use talos_core_evaluator::{compare, CompositeEvaluator};
use talos_domain_models::{AlertRule, AlertState, AlertStateRecord, AlertType, DeviceId, Snapshot};
use talos_infra_pubsub::{AlertEvent, AlertNotificationType, BusMessage, PubSub, TOPIC_ALERT_WARNING, TOPIC_DEVICE_SNAPSHOT};
use talos_infra_storage::PersistedTimeElapsedStore;
use talos_shared_config::NotifierConfig;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

type EvaluatorKey = (DeviceId, String);

pub struct AlertSubsystem {
    devices: Arc<DeviceTable>,
    evaluators: Mutex<HashMap<EvaluatorKey, CompositeEvaluator<Arc<PersistedTimeElapsedStore>>>>,
    states: Mutex<HashMap<EvaluatorKey, AlertStateRecord>>,
    time_elapsed: Arc<PersistedTimeElapsedStore>,
    notifier: NotifierRouter,
    start: Instant,
}

impl AlertSubsystem {
    pub fn new(devices: Arc<DeviceTable>, time_elapsed: Arc<PersistedTimeElapsedStore>, notifier_config: NotifierConfig) -> Self {
        Self {
            devices,
            evaluators: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            time_elapsed,
            notifier: NotifierRouter::new(notifier_config),
            start: Instant::now(),
        }
    }

    pub async fn run(self: Arc<Self>, bus: PubSub, shutdown: Arc<Notify>) {
        let sub = bus.subscribe(TOPIC_DEVICE_SNAPSHOT);
        loop {
            tokio::select! {
                _ = shutdown.notified() => return,
                msg = sub.recv() => {
                    match msg {
                        Some(BusMessage::Snapshot(snapshot)) => self.process_snapshot(&snapshot, &bus).await,
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        }
    }

    async fn process_snapshot(&self, snapshot: &Snapshot, bus: &PubSub) {
        let Some(handle) = self.devices.get(&snapshot.device_id) else {
            return;
        };
        let now_monotonic = self.start.elapsed().as_secs_f64();
        let now_wall = Utc::now().timestamp();

        for rule in &handle.alert_rules {
            let (triggered, value) = self.evaluate_rule(rule, snapshot, now_monotonic, now_wall).await;
            self.advance_state(rule, &snapshot.device_id, triggered, value, now_wall, bus).await;
        }
    }

    async fn evaluate_rule(&self, rule: &AlertRule, snapshot: &Snapshot, now_monotonic: f64, now_wall: i64) -> (bool, f64) {
        if let Some(composite) = &rule.composite {
            let key = (snapshot.device_id.clone(), rule.code.clone());
            let mut evaluators = self.evaluators.lock().await;
            let evaluator = evaluators.entry(key).or_insert_with(|| CompositeEvaluator::new(self.time_elapsed.clone()));
            let triggered = evaluator.evaluate(composite, &snapshot.values, now_monotonic, now_wall, &rule.code);
            let value = rule.sources.first().and_then(|s| snapshot.value(s)).unwrap_or(f64::NAN);
            return (triggered, value);
        }

        if rule.alert_type.requires_multiple_sources() {
            let samples: Vec<f64> = rule.sources.iter().filter_map(|s| snapshot.value(s)).filter(|v| !v.is_nan()).collect();
            if samples.len() < 2 {
                return (false, f64::NAN);
            }
            let aggregate = match rule.alert_type {
                AlertType::Average => samples.iter().sum::<f64>() / samples.len() as f64,
                AlertType::Sum => samples.iter().sum(),
                AlertType::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
                AlertType::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                AlertType::Threshold => unreachable!("Threshold does not require multiple sources"),
            };
            let triggered = compare(rule.operator, aggregate, rule.threshold, rule.min, rule.max, None);
            return (triggered, aggregate);
        }

        let Some(source) = rule.sources.first() else {
            return (false, f64::NAN);
        };
        match snapshot.value(source) {
            Some(v) if !v.is_nan() => (compare(rule.operator, v, rule.threshold, rule.min, rule.max, None), v),
            _ => (false, f64::NAN),
        }
    }

    /// Applies the NORMAL/TRIGGERED/ACTIVE/RESOLVED state table and
    /// publishes on every transition that should notify.
    async fn advance_state(&self, rule: &AlertRule, device_id: &DeviceId, triggered: bool, value: f64, now: i64, bus: &PubSub) {
        let key = (device_id.clone(), rule.code.clone());
        let mut states = self.states.lock().await;
        let current = states.get(&key).cloned();

        let (next, notify) = match (current.as_ref().map(|r| r.state), triggered) {
            (None, false) | (Some(AlertState::Normal), false) => (None, None),
            (None, true) | (Some(AlertState::Normal), true) => (
                Some(AlertStateRecord { state: AlertState::Triggered, severity: rule.severity, triggered_at: Some(now), resolved_at: None, last_value: Some(value) }),
                Some(AlertNotificationType::Triggered),
            ),
            (Some(AlertState::Triggered), true) => (
                Some(AlertStateRecord { state: AlertState::Active, last_value: Some(value), ..current.clone().unwrap() }),
                None,
            ),
            (Some(AlertState::Active), true) => (
                Some(AlertStateRecord { last_value: Some(value), ..current.clone().unwrap() }),
                None,
            ),
            (Some(AlertState::Triggered), false) | (Some(AlertState::Active), false) => (
                Some(AlertStateRecord { state: AlertState::Resolved, resolved_at: Some(now), last_value: Some(value), ..current.clone().unwrap() }),
                Some(AlertNotificationType::Resolved),
            ),
            (Some(AlertState::Resolved), true) => (
                Some(AlertStateRecord { state: AlertState::Triggered, severity: rule.severity, triggered_at: Some(now), resolved_at: None, last_value: Some(value) }),
                Some(AlertNotificationType::Triggered),
            ),
            (Some(AlertState::Resolved), false) => (None, None),
        };

        match &next {
            Some(record) => {
                states.insert(key.clone(), record.clone());
            }
            None => {
                states.remove(&key);
            }
        }
        drop(states);

        if let Some(notification_type) = notify {
            let event = AlertEvent {
                device_id: device_id.as_str().to_string(),
                alert_code: rule.code.clone(),
                severity: rule.severity,
                notification_type,
                message: format!("{} {:?}", rule.name, notification_type),
                value,
            };
            bus.publish(TOPIC_ALERT_WARNING, BusMessage::Alert(event.clone())).await;
            self.notifier.dispatch(&event).await;
        } else {
            debug!(code = %rule.code, device_id = %device_id, triggered, "alert state unchanged, no notification");
        }
    }
}
