//! Tick-aligned upstream batch sender: outbox persistence,
//! per-device-type payload conversion, HTTP resend worker, and storage
//! budget enforcement.

pub mod errors;
pub mod outbox;
pub mod payload;
pub mod scheduler;
pub mod sender;

pub use errors::UpstreamError;
pub use outbox::OutboxStore;
pub use payload::{build_device_id, convert_snapshot, DeviceDataItem, EquipSuffix, PushImaPayload};
pub use sender::{SenderConfig, UpstreamSender};
