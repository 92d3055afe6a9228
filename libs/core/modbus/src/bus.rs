//! Abstract Modbus bus interface, exposing `ensure_connected()` and
//! `read_regs(start, count)`/`write_reg(addr, val)`.
//!
//! The concrete RTU framing/CRC stack is an external collaborator; this
//! crate only defines the trait and the serialization/timeout/reconnect
//! behavior around it.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ModbusError {
    #[error("bus timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("bus disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// One connection to a single serial port; its methods are mutually
/// serialized by a per-port lock. Implementors are not required to do the
/// locking themselves — see [`SerializedBus`], which wraps any
/// [`ModbusBus`] with that guarantee.
#[async_trait]
pub trait ModbusBus: Send + Sync {
    async fn ensure_connected(&self) -> Result<(), ModbusError>;
    async fn read_regs(&self, start: u16, count: u16) -> Result<Vec<u16>, ModbusError>;
    async fn write_reg(&self, addr: u16, val: u16) -> Result<(), ModbusError>;
    async fn write_regs(&self, addr: u16, vals: &[u16]) -> Result<(), ModbusError>;
}
