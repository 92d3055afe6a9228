//! Abstract Modbus bus, bulk-read planner, decode/encode pipeline, generic
//! device, and health tracking.

pub mod bus;
pub mod decode;
pub mod device;
pub mod health;
pub mod planner;
pub mod serialized;

#[cfg(test)]
mod mock;

pub use bus::{ModbusBus, ModbusError};
pub use device::GenericDevice;
pub use health::{
    calculate_health_params, infer_strategy, infer_strategy_with_hint, HealthCheckStrategy, HealthManager, HealthParams,
    HealthState,
};
pub use planner::{plan_bulk_ranges, BulkRange, PlannedPin, DEFAULT_MAX_REGS_PER_REQ};
pub use serialized::SerializedBus;
