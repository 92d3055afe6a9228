//! Per-port serialization and timeout wrapper around any [`ModbusBus`].
//! Timeout is configurable per bus (default 1.0s). Connection
//! failure is propagated; the bus auto-reconnects on next call.

use crate::bus::{ModbusBus, ModbusError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct SerializedBus<T: ModbusBus> {
    inner: T,
    /// Only one in-flight request per port at a time: each
    /// ModbusBus has an exclusive lock.
    lock: Mutex<()>,
    timeout: Duration,
    connected: std::sync::atomic::AtomicBool,
}

impl<T: ModbusBus> SerializedBus<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
            timeout,
            connected: std::sync::atomic::AtomicBool::new(false),
        }
    }

    async fn with_connection<F, Fut, R>(&self, op: F) -> Result<R, ModbusError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R, ModbusError>>,
    {
        let _guard = self.lock.lock().await;
        if !self.connected.load(std::sync::atomic::Ordering::Acquire) {
            self.inner.ensure_connected().await?;
            self.connected.store(true, std::sync::atomic::Ordering::Release);
        }
        match tokio::time::timeout(self.timeout, op()).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                self.connected.store(false, std::sync::atomic::Ordering::Release);
                Err(e)
            }
            Err(_) => {
                self.connected.store(false, std::sync::atomic::Ordering::Release);
                Err(ModbusError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl<T: ModbusBus> ModbusBus for SerializedBus<T> {
    async fn ensure_connected(&self) -> Result<(), ModbusError> {
        let _guard = self.lock.lock().await;
        self.inner.ensure_connected().await?;
        self.connected.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    async fn read_regs(&self, start: u16, count: u16) -> Result<Vec<u16>, ModbusError> {
        self.with_connection(|| self.inner.read_regs(start, count)).await
    }

    async fn write_reg(&self, addr: u16, val: u16) -> Result<(), ModbusError> {
        self.with_connection(|| self.inner.write_reg(addr, val)).await
    }

    async fn write_regs(&self, addr: u16, vals: &[u16]) -> Result<(), ModbusError> {
        self.with_connection(|| self.inner.write_regs(addr, vals)).await
    }
}
