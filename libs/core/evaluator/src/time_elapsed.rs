//! Pluggable last-execution store for `time_elapsed` leaves. The gateway
//! wires this to a small table in the snapshot store so the interval
//! survives a restart; tests use the in-memory variant.

use std::collections::HashMap;

pub trait TimeElapsedStore {
    fn last_execution(&self, rule_code: &str) -> Option<i64>;
    fn record(&mut self, rule_code: &str, at_unix_sec: i64);
}

#[derive(Debug, Default)]
pub struct InMemoryTimeElapsedStore {
    last: HashMap<String, i64>,
}

impl TimeElapsedStore for InMemoryTimeElapsedStore {
    fn last_execution(&self, rule_code: &str) -> Option<i64> {
        self.last.get(rule_code).copied()
    }

    fn record(&mut self, rule_code: &str, at_unix_sec: i64) {
        self.last.insert(rule_code.to_string(), at_unix_sec);
    }
}
