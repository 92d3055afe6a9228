//! In-memory [`ModbusBus`] used by this crate's own tests.

#![cfg(test)]

use crate::bus::{ModbusBus, ModbusError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct MockModbusBus {
    regs: Mutex<Vec<u16>>,
    connected: bool,
    read_requests: AtomicUsize,
}

impl MockModbusBus {
    pub fn new(regs: Vec<u16>) -> Self {
        Self { regs: Mutex::new(regs), connected: true, read_requests: AtomicUsize::new(0) }
    }

    pub fn disconnected() -> Self {
        Self { regs: Mutex::new(Vec::new()), connected: false, read_requests: AtomicUsize::new(0) }
    }

    pub fn read_request_count(&self) -> usize {
        self.read_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModbusBus for MockModbusBus {
    async fn ensure_connected(&self) -> Result<(), ModbusError> {
        if self.connected {
            Ok(())
        } else {
            Err(ModbusError::Disconnected)
        }
    }

    async fn read_regs(&self, start: u16, count: u16) -> Result<Vec<u16>, ModbusError> {
        if !self.connected {
            return Err(ModbusError::Disconnected);
        }
        self.read_requests.fetch_add(1, Ordering::SeqCst);
        let regs = self.regs.lock().unwrap();
        let start = start as usize;
        let end = start + count as usize;
        if end > regs.len() {
            return Err(ModbusError::Transport("out of range".into()));
        }
        Ok(regs[start..end].to_vec())
    }

    async fn write_reg(&self, addr: u16, val: u16) -> Result<(), ModbusError> {
        if !self.connected {
            return Err(ModbusError::Disconnected);
        }
        let mut regs = self.regs.lock().unwrap();
        let addr = addr as usize;
        if addr >= regs.len() {
            regs.resize(addr + 1, 0);
        }
        regs[addr] = val;
        Ok(())
    }

    async fn write_regs(&self, addr: u16, vals: &[u16]) -> Result<(), ModbusError> {
        let mut regs = self.regs.lock().unwrap();
        let addr = addr as usize;
        if addr + vals.len() > regs.len() {
            regs.resize(addr + vals.len(), 0);
        }
        regs[addr..addr + vals.len()].copy_from_slice(vals);
        Ok(())
    }
}
