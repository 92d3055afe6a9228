//! Control Subsystem: matches control rules against each snapshot, resolves
//! priority/blocking conflicts, and applies policy transforms to produce
//! `ControlAction`s.

pub mod executor;

use crate::device_table::DeviceTable;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use talos_core_evaluator::CompositeEvaluator;
use talos_domain_models::{ControlAction, ControlActionType, ControlRule, DeviceId, Policy, Snapshot};
use talos_infra_pubsub::{BusMessage, PubSub, TOPIC_CONTROL, TOPIC_DEVICE_SNAPSHOT};
use talos_infra_storage::PersistedTimeElapsedStore;
use tokio::sync::{Mutex, Notify};

type EvaluatorKey = (DeviceId, String);

pub struct ControlSubsystem {
    devices: Arc<DeviceTable>,
    evaluators: Mutex<HashMap<EvaluatorKey, CompositeEvaluator<Arc<PersistedTimeElapsedStore>>>>,
    time_elapsed: Arc<PersistedTimeElapsedStore>,
    start: Instant,
}

impl ControlSubsystem {
    pub fn new(devices: Arc<DeviceTable>, time_elapsed: Arc<PersistedTimeElapsedStore>) -> Self {
        Self { devices, evaluators: Mutex::new(HashMap::new()), time_elapsed, start: Instant::now() }
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
        let now_wall = chrono::Utc::now().timestamp();

        let mut matched: Vec<&ControlRule> = Vec::new();
        {
            let mut evaluators = self.evaluators.lock().await;
            for rule in &handle.control_rules {
                let key = (snapshot.device_id.clone(), rule.code.clone());
                let evaluator = evaluators.entry(key).or_insert_with(|| CompositeEvaluator::new(self.time_elapsed.clone()));
                if evaluator.evaluate(&rule.composite, &snapshot.values, now_monotonic, now_wall, &rule.code) {
                    matched.push(rule);
                }
            }
        }

        matched.sort_by_key(|r| r.priority);

        // If any matched rule is blocking, only that rule's actions apply.
        if let Some(blocking) = matched.iter().find(|r| r.blocking) {
            matched = vec![*blocking];
        }

        for rule in matched {
            for action in apply_policy(rule, snapshot) {
                bus.publish(TOPIC_CONTROL, BusMessage::Control(action)).await;
            }
        }
    }
}

/// Transforms a matched rule's action templates per its policy. Returns an
/// empty vec when the source value is unavailable or the computed change is
/// not worth emitting.
fn apply_policy(rule: &ControlRule, snapshot: &Snapshot) -> Vec<ControlAction> {
    const EPSILON: f64 = 1e-9;

    match &rule.policy {
        None | Some(Policy::DiscreteSetpoint) => rule.actions.clone(),

        Some(Policy::AbsoluteLinear { source, base_freq, base_temp, gain, deadband }) => {
            let Some(src) = snapshot.value(source).filter(|v| !v.is_nan()) else {
                return Vec::new();
            };
            let magnitude = (src - base_temp).abs();
            let value = match deadband {
                Some(db) if magnitude < *db => *base_freq,
                _ => base_freq + magnitude.max(0.0) * gain,
            };
            rule.actions.iter().cloned().map(|mut a| { a.value = Some(value); a }).collect()
        }

        Some(Policy::IncrementalLinear { source, sources, gain, deadband, max_step }) => {
            let raw = match (source, sources) {
                (Some(s), _) => snapshot.value(s),
                (None, Some([a, b])) => match (snapshot.value(a), snapshot.value(b)) {
                    (Some(x), Some(y)) if !x.is_nan() && !y.is_nan() => Some(x - y),
                    _ => None,
                },
                _ => None,
            };
            let Some(raw) = raw.filter(|v| !v.is_nan()) else {
                return Vec::new();
            };

            let excess = (raw.abs() - deadband).max(0.0);
            let mut delta = excess * gain * raw.signum();
            if let Some(max) = max_step {
                delta = delta.clamp(-max.abs(), max.abs());
            }
            if delta.abs() <= EPSILON {
                return Vec::new();
            }

            rule.actions
                .iter()
                .cloned()
                .map(|mut a| {
                    a.action_type = ControlActionType::AdjustFrequency;
                    a.value = Some(delta);
                    a
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use talos_domain_models::ControlActionType;

    fn snap(values: &[(&str, f64)]) -> Snapshot {
        let mut m = BTreeMap::new();
        for (k, v) in values {
            m.insert(k.to_string(), *v);
        }
        Snapshot::new(DeviceId::new("M", "1"), "M", "1", "inverter", 0, m)
    }

    fn action(action_type: ControlActionType) -> ControlAction {
        ControlAction {
            model: "M".into(),
            slave_id: "1".into(),
            action_type,
            target: None,
            value: None,
            priority: 10,
            reason: "test".into(),
            force: false,
            was_forced: false,
        }
    }

    #[test]
    fn absolute_linear_computes_from_base_and_gain() {
        let rule = ControlRule {
            code: "R1".into(),
            priority: 1,
            composite: talos_domain_models::CompositeNode::All(vec![]),
            policy: Some(Policy::AbsoluteLinear {
                source: "TEMP".into(),
                base_freq: 30.0,
                base_temp: 25.0,
                gain: 2.0,
                deadband: None,
            }),
            actions: vec![action(ControlActionType::SetFrequency)],
            blocking: false,
        };
        let s = snap(&[("TEMP", 30.0)]);
        let actions = apply_policy(&rule, &s);
        assert_eq!(actions[0].value, Some(40.0));
    }

    #[test]
    fn incremental_linear_drops_tiny_deltas() {
        let rule = ControlRule {
            code: "R2".into(),
            priority: 1,
            composite: talos_domain_models::CompositeNode::All(vec![]),
            policy: Some(Policy::IncrementalLinear {
                source: Some("ERR".into()),
                sources: None,
                gain: 1.0,
                deadband: 5.0,
                max_step: None,
            }),
            actions: vec![action(ControlActionType::SetFrequency)],
            blocking: false,
        };
        let s = snap(&[("ERR", 2.0)]);
        assert!(apply_policy(&rule, &s).is_empty());
    }

    #[test]
    fn incremental_linear_clamps_to_max_step() {
        let rule = ControlRule {
            code: "R3".into(),
            priority: 1,
            composite: talos_domain_models::CompositeNode::All(vec![]),
            policy: Some(Policy::IncrementalLinear {
                source: Some("ERR".into()),
                sources: None,
                gain: 10.0,
                deadband: 0.0,
                max_step: Some(2.0),
            }),
            actions: vec![action(ControlActionType::SetFrequency)],
            blocking: false,
        };
        let s = snap(&[("ERR", 5.0)]);
        let actions = apply_policy(&rule, &s);
        assert_eq!(actions[0].action_type, ControlActionType::AdjustFrequency);
        assert_eq!(actions[0].value, Some(2.0));
    }
}
