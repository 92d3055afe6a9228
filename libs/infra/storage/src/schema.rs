use crate::errors::StorageError;
use libsql::Connection;

pub const SNAPSHOTS_TABLE: &str = "snapshots";
pub const TIME_ELAPSED_TABLE: &str = "time_elapsed_state";

/// Applies the repository's schema. Idempotent: safe to call on every
/// connect.
pub async fn apply_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            model TEXT NOT NULL,
            slave_id TEXT NOT NULL,
            device_type TEXT NOT NULL,
            sampling_ts INTEGER NOT NULL,
            is_online INTEGER NOT NULL,
            values_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_device_ts
            ON snapshots(device_id, sampling_ts);
        CREATE TABLE IF NOT EXISTS time_elapsed_state (
            rule_code TEXT PRIMARY KEY,
            last_execution_unix_sec INTEGER NOT NULL
        );
        ",
    )
    .await?;
    Ok(())
}
