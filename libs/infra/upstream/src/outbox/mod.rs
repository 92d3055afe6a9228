//! Durable file outbox: persist-then-send payloads, FIFO batch selection
//! (retry files first), retry/fail renaming, and storage budget enforcement
//! (resend worker and budget enforcement).

pub mod filename;

use crate::errors::UpstreamError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

pub struct OutboxStore {
    dir: PathBuf,
}

struct FileEntry {
    path: PathBuf,
    name: String,
    modified: SystemTime,
}

impl OutboxStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, UpstreamError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Persists a single JSON payload as a new outbox file, returning its
    /// path. Called once per sender tick: save first, upload later, so a
    /// crash mid-send never loses a batch.
    pub fn persist_payload(&self, payload: &serde_json::Value) -> Result<PathBuf, UpstreamError> {
        let name = filename::new_filename(chrono::Utc::now());
        let path = self.dir.join(&name);
        std::fs::write(&path, serde_json::to_vec(payload)?)?;
        Ok(path)
    }

    fn list_entries(&self) -> Vec<FileEntry> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else { return Vec::new() };
        read_dir
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_name()?.to_str()?.to_string();
                let modified = e.metadata().ok()?.modified().ok()?;
                Some(FileEntry { path, name, modified })
            })
            .collect()
    }

    /// Picks up to `limit` files eligible for (re)send: `.retryN.json`
    /// files first, then fresh `.json` files, each group FIFO by mtime,
    /// excluding anything younger than `protect_recent_sec`.
    pub fn pick_batch(&self, limit: usize, protect_recent_sec: f64) -> Vec<PathBuf> {
        let now = SystemTime::now();
        let mut entries = self.list_entries();
        entries.retain(|e| {
            let age = now.duration_since(e.modified).unwrap_or(Duration::ZERO);
            age.as_secs_f64() >= protect_recent_sec
        });

        let mut retry: Vec<&FileEntry> = entries.iter().filter(|e| filename::is_retry_file(&e.name)).collect();
        let mut fresh: Vec<&FileEntry> = entries.iter().filter(|e| filename::is_fresh_file(&e.name)).collect();
        retry.sort_by_key(|e| e.modified);
        fresh.sort_by_key(|e| e.modified);

        retry.into_iter().chain(fresh).take(limit).map(|e| e.path.clone()).collect()
    }

    pub fn delete(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to delete outbox file");
            }
        }
    }

    /// Increments the retry suffix, or marks the file permanently failed
    /// once `max_retry` is reached. A negative `max_retry` means unlimited
    /// retries. Returns the new path (if renamed) and whether the file was
    /// marked failed.
    pub fn retry_or_fail(&self, path: &Path, max_retry: i32) -> Result<(Option<PathBuf>, bool), UpstreamError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok((None, false));
        };
        let retry_count = filename::extract_retry_count(name);

        if max_retry >= 0 && retry_count + 1 >= max_retry as u32 {
            let new_name = filename::mark_as_fail(name);
            let new_path = self.dir.join(new_name);
            match std::fs::rename(path, &new_path) {
                Ok(()) => Ok((None, true)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((None, false)),
                Err(e) => Err(e.into()),
            }
        } else {
            let new_name = filename::increment_retry_name(name);
            let new_path = self.dir.join(new_name);
            match std::fs::rename(path, &new_path) {
                Ok(()) => Ok((Some(new_path), false)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((None, false)),
                Err(e) => Err(e.into()),
            }
        }
    }

    /// Deletes oldest non-`.fail` files first, then oldest `.fail` files,
    /// up to `cleanup_batch` total, whenever the directory exceeds
    /// `quota_mb` or filesystem free space drops below `fs_free_min_mb`. A
    /// no-op whenever `cleanup_enabled` is false.
    pub fn enforce_budget(
        &self,
        quota_mb: u64,
        fs_free_min_mb: u64,
        protect_recent_sec: f64,
        cleanup_batch: usize,
        cleanup_enabled: bool,
    ) {
        if !cleanup_enabled {
            return;
        }

        let dir_size_mb = self.dir_size_mb();
        let fs_free_mb = self.fs_free_mb();
        if dir_size_mb <= quota_mb as f64 && fs_free_mb >= fs_free_min_mb as f64 {
            return;
        }

        let now = SystemTime::now();
        let mut entries = self.list_entries();
        entries.retain(|e| {
            let age = now.duration_since(e.modified).unwrap_or(Duration::ZERO);
            age.as_secs_f64() >= protect_recent_sec
        });
        // Oldest first.
        entries.sort_by_key(|e| e.modified);

        let mut deleted = 0usize;
        for e in entries.iter().filter(|e| !e.name.ends_with(".fail")) {
            if deleted >= cleanup_batch {
                break;
            }
            self.delete(&e.path);
            deleted += 1;
        }
        if deleted < cleanup_batch {
            for e in entries.iter().filter(|e| e.name.ends_with(".fail")) {
                if deleted >= cleanup_batch {
                    break;
                }
                self.delete(&e.path);
                deleted += 1;
            }
        }
        info!(deleted, dir_size_mb, fs_free_mb, "outbox budget enforcement ran");
    }

    fn dir_size_mb(&self) -> f64 {
        let total: u64 = self.list_entries().iter().filter_map(|e| std::fs::metadata(&e.path).ok()).map(|m| m.len()).sum();
        total as f64 / (1024.0 * 1024.0)
    }

    fn fs_free_mb(&self) -> f64 {
        use sysinfo::Disks;
        let disks = Disks::new_with_refreshed_list();
        let target = self.dir.canonicalize().unwrap_or_else(|_| self.dir.clone());
        disks
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space() as f64 / (1024.0 * 1024.0))
            .unwrap_or(f64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn persist_then_pick_then_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(tmp.path()).unwrap();
        let path = store.persist_payload(&json!({"a": 1})).unwrap();
        assert!(path.exists());

        let batch = store.pick_batch(10, 0.0);
        assert_eq!(batch, vec![path.clone()]);

        store.delete(&path);
        assert!(!path.exists());
    }

    #[test]
    fn pick_batch_prefers_retry_files_over_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("resend_a_000_aa.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("resend_b_000_bb.retry1.json"), "{}").unwrap();

        let batch = store.pick_batch(10, 0.0);
        assert_eq!(batch.len(), 2);
        assert!(batch[0].to_string_lossy().contains("retry1"));
    }

    #[test]
    fn retry_or_fail_marks_fail_once_budget_exhausted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(tmp.path()).unwrap();
        let path = store.persist_payload(&json!({})).unwrap();

        let (next, failed) = store.retry_or_fail(&path, 1).unwrap();
        assert!(failed);
        assert!(next.is_none());
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert!(entries[0].as_ref().unwrap().file_name().to_string_lossy().ends_with(".fail"));
    }

    #[test]
    fn retry_or_fail_unlimited_always_increments() {
        let tmp = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(tmp.path()).unwrap();
        let path = store.persist_payload(&json!({})).unwrap();
        let (next, failed) = store.retry_or_fail(&path, -1).unwrap();
        assert!(!failed);
        assert!(next.unwrap().to_string_lossy().contains("retry1"));
    }

    #[test]
    fn budget_is_noop_when_cleanup_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(tmp.path()).unwrap();
        let path = store.persist_payload(&json!({})).unwrap();
        store.enforce_budget(0, u64::MAX, 0.0, 100, false);
        assert!(path.exists());
    }
}
