//! Per-leaf hysteresis + debounce state machine.

use talos_domain_models::ConditionOperator;

#[derive(Debug, Default)]
pub(crate) struct LeafStabilizer {
    is_true: bool,
    pending_since: Option<f64>,
}

impl LeafStabilizer {
    /// Applies hysteresis based on the previous stabilized output, then
    /// debounce on the (possibly widened) result: hysteresis runs first so
    /// debounce always times a continuous-true window on the already
    /// widened/narrowed value, not the raw comparison.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn stabilize(
        &mut self,
        operator: ConditionOperator,
        value: f64,
        mut raw_true: bool,
        threshold: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        hysteresis: f64,
        debounce_sec: f64,
        comparison_tolerance: f64,
        now_monotonic_sec: f64,
    ) -> bool {
        let hold = self.is_true;

        if hysteresis > 0.0 {
            raw_true = match (operator, threshold, min, max) {
                (ConditionOperator::Gt, Some(t), _, _) => {
                    if hold {
                        value >= t - hysteresis
                    } else {
                        value > t
                    }
                }
                (ConditionOperator::Lt, Some(t), _, _) => {
                    if hold {
                        value <= t + hysteresis
                    } else {
                        value < t
                    }
                }
                (ConditionOperator::Between, _, Some(lo), Some(hi)) => {
                    if hold {
                        (lo - hysteresis) <= value && value <= (hi + hysteresis)
                    } else {
                        lo <= value && value <= hi
                    }
                }
                (ConditionOperator::Eq, Some(t), _, _) => {
                    if hold {
                        (value - t).abs() <= comparison_tolerance + hysteresis
                    } else {
                        (value - t).abs() <= comparison_tolerance
                    }
                }
                _ => raw_true,
            };
        }

        if debounce_sec > 0.0 {
            if raw_true {
                match self.pending_since {
                    None => {
                        self.pending_since = Some(now_monotonic_sec);
                        self.is_true = false;
                        false
                    }
                    Some(since) if now_monotonic_sec - since >= debounce_sec => {
                        self.is_true = true;
                        true
                    }
                    Some(_) => {
                        self.is_true = false;
                        false
                    }
                }
            } else {
                self.pending_since = None;
                self.is_true = false;
                false
            }
        } else {
            if !raw_true {
                self.pending_since = None;
            }
            self.is_true = raw_true;
            raw_true
        }
    }
}
