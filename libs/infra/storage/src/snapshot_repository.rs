//! Snapshot repository: insert, time-range/parameter-history queries,
//! retention cleanup, and compaction.

use crate::errors::StorageError;
use crate::schema::apply_schema;
use libsql::{params, Builder, Database};
use std::collections::BTreeMap;
use std::sync::Arc;
use talos_domain_models::{DeviceId, Snapshot};
use tokio::sync::Mutex;
use tracing::{info, instrument};

pub struct DbStats {
    pub row_count: i64,
    pub earliest_sampling_ts: Option<i64>,
    pub latest_sampling_ts: Option<i64>,
    pub file_size_bytes: Option<u64>,
}

pub struct SnapshotRepository {
    db: Arc<Database>,
    /// All writes go through this single session to avoid SQLITE_BUSY under
    /// concurrent writers.
    writer: Mutex<libsql::Connection>,
    db_path: Option<String>,
}

impl SnapshotRepository {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let db = Builder::new_local(url).build().await?;
        let writer = db.connect()?;
        apply_schema(&writer).await?;
        let db_path = if url == ":memory:" { None } else { Some(url.to_string()) };
        Ok(Self { db: Arc::new(db), writer: Mutex::new(writer), db_path })
    }

    #[instrument(skip(self, snapshot))]
    pub async fn insert(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let values_json = serde_json::to_string(&snapshot.values)?;
        let conn = self.writer.lock().await;
        conn.execute(
            "INSERT INTO snapshots (device_id, model, slave_id, device_type, sampling_ts, is_online, values_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.device_id.as_str(),
                snapshot.model.clone(),
                snapshot.slave_id.clone(),
                snapshot.device_type.clone(),
                snapshot.sampling_ts,
                snapshot.is_online as i64,
                values_json,
            ],
        )
        .await?;
        Ok(())
    }

    /// Exposes the single writer session for callers that need to share it
    /// rather than open a second connection, namely
    /// [`crate::PersistedTimeElapsedStore`]'s load/flush against the
    /// `time_elapsed_state` table.
    pub async fn writer_connection(&self) -> tokio::sync::MutexGuard<'_, libsql::Connection> {
        self.writer.lock().await
    }

    pub async fn get_latest_by_device(&self, device_id: &DeviceId, limit: u32) -> Result<Vec<Snapshot>, StorageError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT device_id, model, slave_id, device_type, sampling_ts, is_online, values_json
                 FROM snapshots WHERE device_id = ?1 ORDER BY sampling_ts DESC LIMIT ?2",
                params![device_id.as_str(), limit as i64],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_snapshot(&row)?);
        }
        Ok(out)
    }

    pub async fn get_time_range(
        &self,
        device_id: &DeviceId,
        start: i64,
        end: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Snapshot>, StorageError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT device_id, model, slave_id, device_type, sampling_ts, is_online, values_json
                 FROM snapshots
                 WHERE device_id = ?1 AND sampling_ts >= ?2 AND sampling_ts <= ?3
                 ORDER BY sampling_ts ASC LIMIT ?4 OFFSET ?5",
                params![device_id.as_str(), start, end, limit as i64, offset as i64],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_snapshot(&row)?);
        }
        Ok(out)
    }

    /// Extracts a single parameter's history from the `values_json` column,
    /// preserving timestamp and online state.
    pub async fn get_parameter_history(
        &self,
        device_id: &DeviceId,
        param: &str,
        start: i64,
        end: i64,
        limit: u32,
    ) -> Result<Vec<(i64, bool, Option<f64>)>, StorageError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT sampling_ts, is_online, values_json
                 FROM snapshots
                 WHERE device_id = ?1 AND sampling_ts >= ?2 AND sampling_ts <= ?3
                 ORDER BY sampling_ts ASC LIMIT ?4",
                params![device_id.as_str(), start, end, limit as i64],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let sampling_ts: i64 = row.get(0)?;
            let is_online: i64 = row.get(1)?;
            let values_json: String = row.get(2)?;
            let values: BTreeMap<String, f64> = serde_json::from_str(&values_json)?;
            out.push((sampling_ts, is_online != 0, values.get(param).copied()));
        }
        Ok(out)
    }

    /// Deletes every snapshot older than `now - retention_days * 86400s`.
    #[instrument(skip(self))]
    pub async fn cleanup_old_snapshots(&self, now_unix_sec: i64, retention_days: u32) -> Result<u64, StorageError> {
        let cutoff = now_unix_sec - retention_days as i64 * 86_400;
        let conn = self.writer.lock().await;
        let affected = conn
            .execute("DELETE FROM snapshots WHERE sampling_ts < ?1", params![cutoff])
            .await?;
        info!(cutoff, affected, "cleaned up old snapshots");
        Ok(affected)
    }

    #[instrument(skip(self))]
    pub async fn vacuum_database(&self) -> Result<(), StorageError> {
        let conn = self.writer.lock().await;
        conn.execute("VACUUM", params![]).await?;
        Ok(())
    }

    pub async fn get_db_stats(&self) -> Result<DbStats, StorageError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), MIN(sampling_ts), MAX(sampling_ts) FROM snapshots",
                params![],
            )
            .await?;
        let (row_count, earliest, latest) = match rows.next().await? {
            Some(row) => (row.get::<i64>(0)?, row.get::<Option<i64>>(1)?, row.get::<Option<i64>>(2)?),
            None => (0, None, None),
        };
        let file_size_bytes = match &self.db_path {
            Some(path) => std::fs::metadata(path).ok().map(|m| m.len()),
            None => None,
        };
        Ok(DbStats { row_count, earliest_sampling_ts: earliest, latest_sampling_ts: latest, file_size_bytes })
    }
}

fn row_to_snapshot(row: &libsql::Row) -> Result<Snapshot, StorageError> {
    let device_id: String = row.get(0)?;
    let model: String = row.get(1)?;
    let slave_id: String = row.get(2)?;
    let device_type: String = row.get(3)?;
    let sampling_ts: i64 = row.get(4)?;
    let is_online: i64 = row.get(5)?;
    let values_json: String = row.get(6)?;
    let values: BTreeMap<String, f64> = serde_json::from_str(&values_json)?;
    Ok(Snapshot {
        device_id: DeviceId::from(device_id),
        model,
        slave_id,
        device_type,
        sampling_ts,
        is_online: is_online != 0,
        values,
    })
}
