//! Human-readable structural summary of a composite tree, used in control
//! action `reason` strings. Renders the full recursive AND/OR/NOT shape
//! rather than a flattened one-line description.

use talos_domain_models::{CompositeNode, ConditionOperator, Leaf};

pub fn build_reason_summary(node: &CompositeNode) -> String {
    match node {
        CompositeNode::Leaf { leaf, .. } => leaf_summary(leaf),
        CompositeNode::Any(children) => join_group(children, "OR"),
        CompositeNode::All(children) => join_group(children, "AND"),
        CompositeNode::Not(child) => format!("NOT({})", build_reason_summary(child)),
    }
}

fn join_group(children: &[CompositeNode], op: &str) -> String {
    let parts: Vec<String> = children.iter().map(build_reason_summary).collect();
    if parts.is_empty() {
        return format!("{}(conditions)", op.to_lowercase());
    }
    format!("({})", parts.join(&format!(" {} ", op)))
}

fn op_str(op: ConditionOperator) -> &'static str {
    match op {
        ConditionOperator::Gt => "gt",
        ConditionOperator::Lt => "lt",
        ConditionOperator::Ge => "ge",
        ConditionOperator::Le => "le",
        ConditionOperator::Eq => "eq",
        ConditionOperator::Ne => "ne",
        ConditionOperator::Between => "between",
    }
}

fn leaf_summary(leaf: &Leaf) -> String {
    match leaf {
        Leaf::Threshold { source, operator, threshold, min, max, .. } => {
            if *operator == ConditionOperator::Between {
                format!("threshold({source} between {}..{})", min.unwrap_or_default(), max.unwrap_or_default())
            } else {
                format!("threshold({source} {} {})", op_str(*operator), threshold.unwrap_or_default())
            }
        }
        Leaf::Difference { sources, operator, threshold, min, max, abs, .. } => {
            let srcs = sources.join(",");
            let abs_suffix = if *abs { " abs" } else { "" };
            if *operator == ConditionOperator::Between {
                format!(
                    "difference([{srcs}] between {}..{}{abs_suffix})",
                    min.unwrap_or_default(),
                    max.unwrap_or_default()
                )
            } else {
                format!("difference([{srcs}] {} {}{abs_suffix})", op_str(*operator), threshold.unwrap_or_default())
            }
        }
        Leaf::TimeElapsed { interval_hours } => format!("time_elapsed({interval_hours}h)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_and_not() {
        let tree = CompositeNode::All(vec![
            CompositeNode::Leaf {
                id: Some(0),
                leaf: Leaf::Threshold {
                    source: "X".into(),
                    operator: ConditionOperator::Gt,
                    threshold: Some(30.0),
                    min: None,
                    max: None,
                    hysteresis: None,
                    debounce_sec: None,
                    comparison_tolerance: None,
                },
            },
            CompositeNode::Not(Box::new(CompositeNode::Leaf {
                id: Some(1),
                leaf: Leaf::Difference {
                    sources: ["A".into(), "B".into()],
                    operator: ConditionOperator::Gt,
                    threshold: Some(4.0),
                    min: None,
                    max: None,
                    abs: false,
                    hysteresis: None,
                    debounce_sec: None,
                    comparison_tolerance: None,
                },
            })),
        ]);
        assert_eq!(
            build_reason_summary(&tree),
            "(threshold(X gt 30) AND NOT(difference([A,B] gt 4)))"
        );
    }
}
