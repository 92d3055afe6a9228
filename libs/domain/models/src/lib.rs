//! Typed data model for the Talos gateway core.
//!
//! Every struct here is a plain value type: components pass these around by
//! value or `Arc`, never through a process-wide singleton (see DESIGN.md,
//! "Singletons -> explicit dependencies").

pub mod alert;
pub mod composite;
pub mod constraint;
pub mod control;
pub mod device;
pub mod register;
pub mod snapshot;

pub use alert::{AlertRule, AlertSeverity, AlertState, AlertStateRecord, AlertType};
pub use composite::{CompositeNode, ConditionOperator, Leaf};
pub use constraint::{Bound, ConstraintPolicy};
pub use control::{ControlAction, ControlActionType, ControlRule, Policy};
pub use device::{BusSettings, DeviceId, DeviceInstance, OnOffBinding};
pub use register::{RegisterDefinition, RegisterFormat, RegisterKind, RegisterMap};
pub use snapshot::Snapshot;

/// Sentinel written into a [`snapshot::Snapshot`] value slot when a
/// parameter could not be read.
pub const UNREADABLE_SENTINEL: f64 = -1.0;
