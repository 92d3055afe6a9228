//! Persisted backing for the evaluator's `time_elapsed` leaves, so a
//! restart pre-populates the evaluator instead of resetting every timer.
//! The evaluator trait is synchronous, so this keeps an in-memory cache
//! for the hot path and exposes async load/flush against the snapshot
//! database.

use crate::errors::StorageError;
use libsql::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use talos_core_evaluator::TimeElapsedStore;

pub struct PersistedTimeElapsedStore {
    cache: Mutex<HashMap<String, i64>>,
}

impl PersistedTimeElapsedStore {
    pub fn new(initial: HashMap<String, i64>) -> Self {
        Self { cache: Mutex::new(initial) }
    }

    /// Loads every row into a map the evaluator can be pre-populated with at
    /// startup.
    pub async fn load_all(conn: &Connection) -> Result<HashMap<String, i64>, StorageError> {
        let mut rows = conn.query("SELECT rule_code, last_execution_unix_sec FROM time_elapsed_state", params![]).await?;
        let mut map = HashMap::new();
        while let Some(row) = rows.next().await? {
            let rule_code: String = row.get(0)?;
            let last: i64 = row.get(1)?;
            map.insert(rule_code, last);
        }
        Ok(map)
    }

    /// Persists the current in-memory cache, called periodically by the
    /// gateway after each evaluation pass.
    pub async fn flush(&self, conn: &Connection) -> Result<(), StorageError> {
        let snapshot: Vec<(String, i64)> = {
            let guard = self.cache.lock().unwrap();
            guard.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        for (rule_code, last) in snapshot {
            conn.execute(
                "INSERT INTO time_elapsed_state (rule_code, last_execution_unix_sec) VALUES (?1, ?2)
                 ON CONFLICT(rule_code) DO UPDATE SET last_execution_unix_sec = excluded.last_execution_unix_sec",
                params![rule_code, last],
            )
            .await?;
        }
        Ok(())
    }
}

impl TimeElapsedStore for PersistedTimeElapsedStore {
    fn last_execution(&self, rule_code: &str) -> Option<i64> {
        self.cache.lock().unwrap().get(rule_code).copied()
    }

    fn record(&mut self, rule_code: &str, at_unix_sec: i64) {
        self.cache.lock().unwrap().insert(rule_code.to_string(), at_unix_sec);
    }
}

/// Lets many per-rule `CompositeEvaluator`s share one persisted store: the
/// cache is already behind a `Mutex`, so `&mut Arc<..>` never needs unique
/// ownership of the pointee.
impl TimeElapsedStore for Arc<PersistedTimeElapsedStore> {
    fn last_execution(&self, rule_code: &str) -> Option<i64> {
        self.cache.lock().unwrap().get(rule_code).copied()
    }

    fn record(&mut self, rule_code: &str, at_unix_sec: i64) {
        self.cache.lock().unwrap().insert(rule_code.to_string(), at_unix_sec);
    }
}
