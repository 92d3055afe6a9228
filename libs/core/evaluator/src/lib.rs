//! Composite condition evaluator.
//!
//! Hysteresis first widens or narrows the raw comparison based on the
//! leaf's previous stabilized output, then debounce gates the result
//! behind a continuous-true timer that resets on any interruption.

mod reason;
mod stabilize;
mod time_elapsed;

pub use reason::build_reason_summary;
pub use time_elapsed::{InMemoryTimeElapsedStore, TimeElapsedStore};

use stabilize::LeafStabilizer;
use std::collections::HashMap;
use talos_domain_models::{CompositeNode, ConditionOperator, Leaf};

/// Supplies a named parameter's current value; typically backed by a
/// `Snapshot`.
pub trait ValueGetter {
    fn get(&self, source: &str) -> Option<f64>;
}

impl ValueGetter for std::collections::BTreeMap<String, f64> {
    fn get(&self, source: &str) -> Option<f64> {
        std::collections::BTreeMap::get(self, source).copied()
    }
}

/// Evaluates composite trees, owning per-leaf hysteresis/debounce state and
/// delegating time-elapsed leaves to a [`TimeElapsedStore`].
pub struct CompositeEvaluator<T: TimeElapsedStore> {
    leaf_states: HashMap<u32, LeafStabilizer>,
    time_elapsed: T,
}

impl<T: TimeElapsedStore> CompositeEvaluator<T> {
    pub fn new(time_elapsed: T) -> Self {
        Self {
            leaf_states: HashMap::new(),
            time_elapsed,
        }
    }

    /// Discards all leaf hysteresis/debounce state. Called when rules are
    /// reloaded, since stale hysteresis/debounce state from the old tree
    /// must not leak into the new one.
    pub fn reset(&mut self) {
        self.leaf_states.clear();
    }

    /// `now_monotonic_sec` drives debounce timers; `now_wall_sec` drives
    /// time-elapsed leaves. They are separate clocks deliberately: debounce
    /// must never go backwards across a wall-clock adjustment, while
    /// time-elapsed must survive process restarts and therefore needs wall
    /// time.
    pub fn evaluate(
        &mut self,
        node: &CompositeNode,
        values: &dyn ValueGetter,
        now_monotonic_sec: f64,
        now_wall_sec: i64,
        rule_code: &str,
    ) -> bool {
        match node {
            CompositeNode::All(children) => children
                .iter()
                .all(|c| self.evaluate(c, values, now_monotonic_sec, now_wall_sec, rule_code)),
            CompositeNode::Any(children) => children
                .iter()
                .any(|c| self.evaluate(c, values, now_monotonic_sec, now_wall_sec, rule_code)),
            CompositeNode::Not(child) => {
                !self.evaluate(child, values, now_monotonic_sec, now_wall_sec, rule_code)
            }
            CompositeNode::Leaf { id, leaf } => {
                let leaf_id = id.expect("leaf must be validated (id assigned) before evaluation");
                self.evaluate_leaf(leaf_id, leaf, values, now_monotonic_sec, now_wall_sec, rule_code)
            }
        }
    }

    fn evaluate_leaf(
        &mut self,
        leaf_id: u32,
        leaf: &Leaf,
        values: &dyn ValueGetter,
        now_monotonic_sec: f64,
        now_wall_sec: i64,
        rule_code: &str,
    ) -> bool {
        match leaf {
            Leaf::Threshold {
                source,
                operator,
                threshold,
                min,
                max,
                hysteresis,
                debounce_sec,
                comparison_tolerance,
            } => {
                let value = match values.get(source) {
                    Some(v) if !v.is_nan() => v,
                    _ => return false,
                };
                let raw = compare(*operator, value, *threshold, *min, *max, *comparison_tolerance);
                let stabilizer = self.leaf_states.entry(leaf_id).or_default();
                stabilizer.stabilize(
                    *operator,
                    value,
                    raw,
                    *threshold,
                    *min,
                    *max,
                    hysteresis.unwrap_or(0.0),
                    debounce_sec.unwrap_or(0.0),
                    comparison_tolerance.unwrap_or(1e-9),
                    now_monotonic_sec,
                )
            }
            Leaf::Difference {
                sources,
                operator,
                threshold,
                min,
                max,
                abs,
                hysteresis,
                debounce_sec,
                comparison_tolerance,
            } => {
                let v1 = values.get(&sources[0]);
                let v2 = values.get(&sources[1]);
                let (v1, v2) = match (v1, v2) {
                    (Some(a), Some(b)) if !a.is_nan() && !b.is_nan() => (a, b),
                    _ => return false,
                };
                let mut diff = v1 - v2;
                if *abs {
                    diff = diff.abs();
                }
                let raw = compare(*operator, diff, *threshold, *min, *max, *comparison_tolerance);
                let stabilizer = self.leaf_states.entry(leaf_id).or_default();
                stabilizer.stabilize(
                    *operator,
                    diff,
                    raw,
                    *threshold,
                    *min,
                    *max,
                    hysteresis.unwrap_or(0.0),
                    debounce_sec.unwrap_or(0.0),
                    comparison_tolerance.unwrap_or(1e-9),
                    now_monotonic_sec,
                )
            }
            Leaf::TimeElapsed { interval_hours } => {
                if *interval_hours <= 0.0 {
                    return false;
                }
                match self.time_elapsed.last_execution(rule_code) {
                    None => {
                        self.time_elapsed.record(rule_code, now_wall_sec);
                        true
                    }
                    Some(last) => {
                        let elapsed_hours = (now_wall_sec - last) as f64 / 3600.0;
                        if elapsed_hours >= *interval_hours {
                            self.time_elapsed.record(rule_code, now_wall_sec);
                            true
                        } else {
                            false
                        }
                    }
                }
            }
        }
    }
}

/// Raw (pre-hysteresis) operator comparison for a threshold leaf. Public
/// so the legacy (non-composite) alert aggregation path can reuse the exact
/// same operator semantics instead of duplicating them.
pub fn compare(
    operator: ConditionOperator,
    value: f64,
    threshold: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    comparison_tolerance: Option<f64>,
) -> bool {
    match operator {
        ConditionOperator::Gt => threshold.is_some_and(|t| value > t),
        ConditionOperator::Lt => threshold.is_some_and(|t| value < t),
        ConditionOperator::Ge => threshold.is_some_and(|t| value >= t),
        ConditionOperator::Le => threshold.is_some_and(|t| value <= t),
        ConditionOperator::Ne => threshold.is_some_and(|t| match comparison_tolerance {
            Some(tol) => (value - t).abs() > tol,
            None => value != t,
        }),
        ConditionOperator::Eq => match threshold {
            None => false,
            Some(t) => match comparison_tolerance {
                Some(tol) => (value - t).abs() <= tol,
                None => value == t,
            },
        },
        ConditionOperator::Between => match (min, max) {
            (Some(lo), Some(hi)) => value >= lo && value <= hi,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use talos_domain_models::CompositeNode;

    fn snapshot(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn threshold_gt(source: &str, threshold: f64, id: u32) -> CompositeNode {
        CompositeNode::Leaf {
            id: Some(id),
            leaf: Leaf::Threshold {
                source: source.into(),
                operator: ConditionOperator::Gt,
                threshold: Some(threshold),
                min: None,
                max: None,
                hysteresis: None,
                debounce_sec: None,
                comparison_tolerance: None,
            },
        }
    }

    #[test]
    fn and_or_not_recurse() {
        let mut ev = CompositeEvaluator::new(InMemoryTimeElapsedStore::default());
        let tree = CompositeNode::All(vec![
            threshold_gt("A", 10.0, 0),
            CompositeNode::Not(Box::new(threshold_gt("B", 100.0, 1))),
        ]);
        let snap = snapshot(&[("A", 20.0), ("B", 5.0)]);
        assert!(ev.evaluate(&tree, &snap, 0.0, 0, "r"));
    }

    #[test]
    fn missing_source_is_false() {
        let mut ev = CompositeEvaluator::new(InMemoryTimeElapsedStore::default());
        let tree = threshold_gt("MISSING", 1.0, 0);
        let snap = snapshot(&[]);
        assert!(!ev.evaluate(&tree, &snap, 0.0, 0, "r"));
    }

    #[test]
    fn hysteresis_keeps_true_until_below_threshold_minus_hysteresis() {
        let mut ev = CompositeEvaluator::new(InMemoryTimeElapsedStore::default());
        let leaf = CompositeNode::Leaf {
            id: Some(0),
            leaf: Leaf::Threshold {
                source: "T".into(),
                operator: ConditionOperator::Gt,
                threshold: Some(30.0),
                min: None,
                max: None,
                hysteresis: Some(5.0),
                debounce_sec: None,
                comparison_tolerance: None,
            },
        };
        assert!(ev.evaluate(&leaf, &snapshot(&[("T", 31.0)]), 0.0, 0, "r"));
        // Still above threshold - hysteresis (25), stays true.
        assert!(ev.evaluate(&leaf, &snapshot(&[("T", 26.0)]), 1.0, 0, "r"));
        // At the boundary, inclusive.
        assert!(ev.evaluate(&leaf, &snapshot(&[("T", 25.0)]), 2.0, 0, "r"));
        // Below threshold - hysteresis, flips false.
        assert!(!ev.evaluate(&leaf, &snapshot(&[("T", 24.9)]), 3.0, 0, "r"));
    }

    #[test]
    fn debounce_requires_continuous_true_duration() {
        let mut ev = CompositeEvaluator::new(InMemoryTimeElapsedStore::default());
        let leaf = CompositeNode::Leaf {
            id: Some(0),
            leaf: Leaf::Threshold {
                source: "T".into(),
                operator: ConditionOperator::Gt,
                threshold: Some(10.0),
                min: None,
                max: None,
                hysteresis: None,
                debounce_sec: Some(5.0),
                comparison_tolerance: None,
            },
        };
        let snap = snapshot(&[("T", 20.0)]);
        assert!(!ev.evaluate(&leaf, &snap, 0.0, 0, "r")); // pending_since = 0
        assert!(!ev.evaluate(&leaf, &snap, 3.0, 0, "r")); // 3s < 5s
        assert!(ev.evaluate(&leaf, &snap, 5.0, 0, "r")); // 5s >= 5s
        // A break resets the pending timer.
        assert!(!ev.evaluate(&leaf, &snapshot(&[("T", 1.0)]), 6.0, 0, "r"));
        assert!(!ev.evaluate(&leaf, &snap, 7.0, 0, "r")); // pending_since reset to 7
    }

    #[test]
    fn time_elapsed_true_on_first_then_gated_by_interval() {
        let mut ev = CompositeEvaluator::new(InMemoryTimeElapsedStore::default());
        let leaf = CompositeNode::Leaf {
            id: Some(0),
            leaf: Leaf::TimeElapsed { interval_hours: 1.0 },
        };
        assert!(ev.evaluate(&leaf, &snapshot(&[]), 0.0, 0, "rule-a"));
        assert!(!ev.evaluate(&leaf, &snapshot(&[]), 0.0, 1800, "rule-a"));
        assert!(ev.evaluate(&leaf, &snapshot(&[]), 0.0, 3600, "rule-a"));
    }

    #[test]
    fn negative_interval_is_always_false() {
        let mut ev = CompositeEvaluator::new(InMemoryTimeElapsedStore::default());
        let leaf = CompositeNode::Leaf {
            id: Some(0),
            leaf: Leaf::TimeElapsed { interval_hours: -1.0 },
        };
        assert!(!ev.evaluate(&leaf, &snapshot(&[]), 0.0, 0, "rule-b"));
    }
}
