//! Composite boolean condition tree, shared by the alert and control
//! subsystems.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_DEPTH: usize = 15;
pub const MAX_FANOUT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Between,
}

/// A leaf comparison. Exactly one of the three shapes is present: a
/// composite node is either a group or a leaf, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leaf {
    Threshold {
        source: String,
        operator: ConditionOperator,
        threshold: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        hysteresis: Option<f64>,
        debounce_sec: Option<f64>,
        /// Only meaningful for `Eq`; `None` means strict equality.
        comparison_tolerance: Option<f64>,
    },
    Difference {
        sources: [String; 2],
        operator: ConditionOperator,
        threshold: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        #[serde(default)]
        abs: bool,
        hysteresis: Option<f64>,
        debounce_sec: Option<f64>,
        comparison_tolerance: Option<f64>,
    },
    TimeElapsed {
        interval_hours: f64,
    },
}

/// A stable identity for a leaf node's hysteresis/debounce state, assigned
/// at validation time. Reloading rules discards old state because a fresh
/// tree gets fresh ids.
pub type LeafId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeNode {
    All(Vec<CompositeNode>),
    Any(Vec<CompositeNode>),
    Not(Box<CompositeNode>),
    Leaf {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        id: Option<LeafId>,
        #[serde(flatten)]
        leaf: Leaf,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum CompositeValidationError {
    #[error("composite tree exceeds max depth {max} (got {got})")]
    TooDeep { max: usize, got: usize },
    #[error("composite group exceeds max fan-out {max} (got {got})")]
    TooWide { max: usize, got: usize },
}

impl CompositeNode {
    /// Assigns a fresh, stable [`LeafId`] to every leaf in the tree (depth
    /// first, left to right) and validates depth/fan-out bounds. A tree of
    /// owned nodes cannot contain a reference cycle in this representation,
    /// so cycle detection is structurally guaranteed rather than checked
    /// at runtime; see DESIGN.md.
    pub fn validate_and_assign_ids(&mut self) -> Result<(), CompositeValidationError> {
        let mut next_id: LeafId = 0;
        Self::walk_assign(self, 1, &mut next_id)
    }

    fn walk_assign(
        node: &mut CompositeNode,
        depth: usize,
        next_id: &mut LeafId,
    ) -> Result<(), CompositeValidationError> {
        if depth > MAX_DEPTH {
            return Err(CompositeValidationError::TooDeep { max: MAX_DEPTH, got: depth });
        }
        match node {
            CompositeNode::All(children) | CompositeNode::Any(children) => {
                if children.len() > MAX_FANOUT {
                    return Err(CompositeValidationError::TooWide {
                        max: MAX_FANOUT,
                        got: children.len(),
                    });
                }
                for child in children.iter_mut() {
                    Self::walk_assign(child, depth + 1, next_id)?;
                }
                Ok(())
            }
            CompositeNode::Not(child) => Self::walk_assign(child, depth + 1, next_id),
            CompositeNode::Leaf { id, .. } => {
                *id = Some(*next_id);
                *next_id += 1;
                Ok(())
            }
        }
    }

    pub fn max_depth(&self) -> usize {
        match self {
            CompositeNode::All(children) | CompositeNode::Any(children) => {
                1 + children.iter().map(Self::max_depth).max().unwrap_or(0)
            }
            CompositeNode::Not(child) => 1 + child.max_depth(),
            CompositeNode::Leaf { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold_leaf(source: &str) -> CompositeNode {
        CompositeNode::Leaf {
            id: None,
            leaf: Leaf::Threshold {
                source: source.into(),
                operator: ConditionOperator::Gt,
                threshold: Some(30.0),
                min: None,
                max: None,
                hysteresis: None,
                debounce_sec: None,
                comparison_tolerance: None,
            },
        }
    }

    #[test]
    fn assigns_sequential_ids_depth_first() {
        let mut tree = CompositeNode::All(vec![threshold_leaf("A"), threshold_leaf("B")]);
        tree.validate_and_assign_ids().unwrap();
        if let CompositeNode::All(children) = &tree {
            let ids: Vec<_> = children
                .iter()
                .map(|c| match c {
                    CompositeNode::Leaf { id, .. } => id.unwrap(),
                    _ => unreachable!(),
                })
                .collect();
            assert_eq!(ids, vec![0, 1]);
        } else {
            unreachable!()
        }
    }

    #[test]
    fn rejects_excess_depth() {
        let mut node = threshold_leaf("A");
        for _ in 0..MAX_DEPTH {
            node = CompositeNode::Not(Box::new(node));
        }
        let err = node.validate_and_assign_ids().unwrap_err();
        assert!(matches!(err, CompositeValidationError::TooDeep { .. }));
    }

    #[test]
    fn rejects_excess_fanout() {
        let mut node = CompositeNode::All((0..MAX_FANOUT + 1).map(|i| threshold_leaf(&i.to_string())).collect());
        let err = node.validate_and_assign_ids().unwrap_err();
        assert!(matches!(err, CompositeValidationError::TooWide { .. }));
    }
}
