//! Concrete `ModbusBus` backed by a real RTU serial link (`tokio-modbus` +
//! `tokio-serial`). `talos_core_modbus::ModbusBus` only exposes a single
//! register address space (`read_regs`/`write_reg`/`write_regs`), so this
//! always talks holding registers; discrete inputs/coils are addressed by
//! the same offset space, matching how the decode layer already treats
//! `RegisterKind` as metadata rather than a different wire operation.
//!
//! One physical serial port can carry several devices at different slave
//! addresses. `SerialPort` owns the one `Context` for a port; each
//! device's `RtuModbusBus` holds a handle to that shared `SerialPort` plus
//! its own slave id, and retargets the connection (`set_slave`) before
//! every request. `talos_core_modbus::SerializedBus` still wraps each
//! device's `RtuModbusBus` for the timeout behavior, but the actual
//! exclusive-access lock lives here, shared by every device on the port.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use talos_core_modbus::{ModbusBus, ModbusError};
use tokio::sync::Mutex;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::*;
use tokio_serial::SerialStream;
use tracing::{debug, warn};

/// One serial port, shared by every device instance addressing it.
pub struct SerialPort {
    port: String,
    baudrate: u32,
    ctx: Mutex<Option<Context>>,
}

impl SerialPort {
    pub fn new(port: impl Into<String>, baudrate: u32) -> Arc<Self> {
        Arc::new(Self { port: port.into(), baudrate, ctx: Mutex::new(None) })
    }

    fn open_stream(&self) -> Result<SerialStream, ModbusError> {
        let builder = tokio_serial::new(&self.port, self.baudrate).timeout(Duration::from_millis(500));
        SerialStream::open(&builder).map_err(|e| {
            warn!(port = %self.port, error = %e, "failed to open serial port");
            ModbusError::Transport(format!("open {}: {e}", self.port))
        })
    }

    async fn ensure_connected(&self) -> Result<(), ModbusError> {
        let mut guard = self.ctx.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let stream = self.open_stream()?;
        let context = rtu::attach_slave(stream, Slave(0));
        debug!(port = %self.port, "serial port connected");
        *guard = Some(context);
        Ok(())
    }

    /// Locks the shared connection and retargets it to `slave`, ready for
    /// exactly one request. Callers drop the connection themselves on a
    /// transport error so the next call reconnects (the bus auto-reconnects
    /// on next call).
    async fn retargeted(&self, slave: Slave) -> Result<tokio::sync::MutexGuard<'_, Option<Context>>, ModbusError> {
        self.ensure_connected().await?;
        let mut guard = self.ctx.lock().await;
        match guard.as_mut() {
            Some(context) => context.set_slave(slave),
            None => return Err(ModbusError::Disconnected),
        }
        Ok(guard)
    }
}

pub struct RtuModbusBus {
    port: Arc<SerialPort>,
    slave: Slave,
}

impl RtuModbusBus {
    pub fn new(port: Arc<SerialPort>, slave_id: u8) -> Self {
        Self { port, slave: Slave(slave_id) }
    }
}

#[async_trait]
impl ModbusBus for RtuModbusBus {
    async fn ensure_connected(&self) -> Result<(), ModbusError> {
        self.port.ensure_connected().await
    }

    async fn read_regs(&self, start: u16, count: u16) -> Result<Vec<u16>, ModbusError> {
        let mut guard = self.port.retargeted(self.slave).await?;
        let context = guard.as_mut().expect("retargeted only returns Some");
        let result = context
            .read_holding_registers(start, count)
            .await
            .map_err(|e| ModbusError::Transport(e.to_string()))
            .and_then(|r| r.map_err(|e| ModbusError::Transport(format!("exception: {e:?}"))));
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn write_reg(&self, addr: u16, val: u16) -> Result<(), ModbusError> {
        let mut guard = self.port.retargeted(self.slave).await?;
        let context = guard.as_mut().expect("retargeted only returns Some");
        let result = context
            .write_single_register(addr, val)
            .await
            .map_err(|e| ModbusError::Transport(e.to_string()))
            .and_then(|r| r.map_err(|e| ModbusError::Transport(format!("exception: {e:?}"))));
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn write_regs(&self, addr: u16, vals: &[u16]) -> Result<(), ModbusError> {
        let mut guard = self.port.retargeted(self.slave).await?;
        let context = guard.as_mut().expect("retargeted only returns Some");
        let result = context
            .write_multiple_registers(addr, vals)
            .await
            .map_err(|e| ModbusError::Transport(e.to_string()))
            .and_then(|r| r.map_err(|e| ModbusError::Transport(format!("exception: {e:?}"))));
        if result.is_err() {
            *guard = None;
        }
        result
    }
}
