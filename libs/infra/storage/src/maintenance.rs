//! Retention cleanup / vacuum scheduled task. Runs on a timer: cleanup
//! every `cleanup_interval_hours`, vacuum every `vacuum_interval_days`,
//! guarded by the last vacuum time to rate-limit vacuum.

use crate::snapshot_repository::SnapshotRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct MaintenanceConfig {
    pub cleanup_interval_hours: u32,
    pub vacuum_interval_days: u32,
    pub retention_days: u32,
    pub cleanup_enabled: bool,
}

/// Runs forever, sleeping `cleanup_interval_hours` between passes. Vacuum is
/// additionally rate-limited by `last_vacuum_time` so a short cleanup
/// interval doesn't also mean frequent, expensive vacuums.
pub async fn run_maintenance_loop(repo: Arc<SnapshotRepository>, config: MaintenanceConfig, now_unix_sec: impl Fn() -> i64) {
    if !config.cleanup_enabled {
        info!("snapshot maintenance disabled; loop exiting immediately");
        return;
    }

    let cleanup_interval = Duration::from_secs(config.cleanup_interval_hours as u64 * 3600);
    let vacuum_interval_sec = config.vacuum_interval_days as i64 * 86_400;
    let mut last_vacuum_time = now_unix_sec();

    loop {
        tokio::time::sleep(cleanup_interval).await;
        let now = now_unix_sec();

        match repo.cleanup_old_snapshots(now, config.retention_days).await {
            Ok(affected) => info!(affected, "retention cleanup pass complete"),
            Err(e) => error!(error = %e, "retention cleanup failed"),
        }

        if now - last_vacuum_time >= vacuum_interval_sec {
            match repo.vacuum_database().await {
                Ok(()) => {
                    last_vacuum_time = now;
                    info!("vacuum complete");
                }
                Err(e) => error!(error = %e, "vacuum failed"),
            }
        }
    }
}
