//! Write constraint policy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bound {
    /// Absent bounds are treated as +/- infinity.
    pub fn allows(&self, value: f64) -> bool {
        let above_min = self.min.map(|m| value >= m).unwrap_or(true);
        let below_max = self.max.map(|m| value <= m).unwrap_or(true);
        above_min && below_max
    }

    /// Widens this bound, if necessary, to include `value`. Used for the
    /// temporary `force=true` override in the control executor.
    pub fn widened_to_include(&self, value: f64) -> Bound {
        let min = self.min.map(|m| m.min(value)).or(None);
        let max = self.max.map(|m| m.max(value)).or(None);
        Bound { min, max }
    }
}

/// Per-parameter bounds, resolved by a 3-level merge: global defaults ->
/// model defaults -> instance override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintPolicy {
    bounds: HashMap<String, Bound>,
}

impl ConstraintPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, param: impl Into<String>, bound: Bound) {
        self.bounds.insert(param.into(), bound);
    }

    pub fn bound_for(&self, param: &str) -> Bound {
        self.bounds.get(param).copied().unwrap_or_default()
    }

    /// A write is allowed iff `min <= value <= max`; a missing bound is
    /// unconstrained.
    pub fn allow(&self, param: &str, value: f64) -> bool {
        self.bound_for(param).allows(value)
    }

    /// Merges `global`, then `model`, then `instance`, with later layers
    /// overriding earlier ones for the same parameter (`device_instance_config.yml`:
    /// global_defaults -> model defaults -> instance override).
    pub fn merge(global: &ConstraintPolicy, model: &ConstraintPolicy, instance: &ConstraintPolicy) -> ConstraintPolicy {
        let mut merged = global.clone();
        for (k, v) in &model.bounds {
            merged.bounds.insert(k.clone(), *v);
        }
        for (k, v) in &instance.bounds {
            merged.bounds.insert(k.clone(), *v);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_bounds_allow_everything() {
        let b = Bound::default();
        assert!(b.allows(f64::MIN));
        assert!(b.allows(f64::MAX));
    }

    #[test]
    fn bound_rejects_outside_range() {
        let b = Bound { min: Some(0.0), max: Some(50.0) };
        assert!(b.allows(0.0));
        assert!(b.allows(50.0));
        assert!(!b.allows(50.1));
        assert!(!b.allows(-0.1));
    }

    #[test]
    fn three_level_merge_prefers_instance_over_model_over_global() {
        let mut global = ConstraintPolicy::new();
        global.set("RW_HZ", Bound { min: Some(0.0), max: Some(60.0) });
        let mut model = ConstraintPolicy::new();
        model.set("RW_HZ", Bound { min: Some(0.0), max: Some(50.0) });
        let mut instance = ConstraintPolicy::new();
        instance.set("RW_HZ", Bound { min: Some(5.0), max: Some(45.0) });

        let merged = ConstraintPolicy::merge(&global, &model, &instance);
        assert_eq!(merged.bound_for("RW_HZ"), Bound { min: Some(5.0), max: Some(45.0) });
    }

    #[test]
    fn widen_to_include_extends_only_as_needed() {
        let b = Bound { min: Some(0.0), max: Some(50.0) };
        let widened = b.widened_to_include(55.0);
        assert_eq!(widened.max, Some(55.0));
        assert_eq!(widened.min, Some(0.0));
    }
}
