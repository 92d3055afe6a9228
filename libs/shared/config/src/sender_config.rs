//! `sender_config.yml`: upstream sender tuning. Mirrors the field
//! set of `talos-infra-upstream::SenderConfig`; kept as a standalone struct
//! here so this crate stays free of a dependency on `talos-infra-upstream`,
//! with the gateway binary converting between the two at bootstrap.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SenderConfigFile {
    pub gateway_id: String,
    pub cloud_url: String,
    #[serde(default = "default_http_timeout_sec")]
    pub http_timeout_sec: f64,
    #[serde(default = "default_attempt_count")]
    pub attempt_count: u32,
    #[serde(default)]
    pub anchor_offset_sec: i64,
    pub send_interval_sec: i64,
    pub fresh_window_sec: i64,
    #[serde(default)]
    pub last_known_ttl_sec: i64,
    pub resend_start_delay_sec: i64,
    pub fail_resend_interval_sec: i64,
    #[serde(default)]
    pub resend_anchor_offset_sec: i64,
    pub fail_resend_batch: usize,
    /// Negative means unlimited retries (mirrors `talos_infra_upstream::SenderConfig::max_retry`).
    pub max_retry: i32,
    pub protect_recent_sec: i64,
    #[serde(default)]
    pub last_post_ok_within_sec: i64,
    pub resend_quota_mb: u64,
    pub fs_free_min_mb: u64,
    pub resend_cleanup_batch: usize,
    #[serde(default = "default_true")]
    pub resend_cleanup_enabled: bool,
    pub outbox_dir: String,
}

fn default_http_timeout_sec() -> f64 {
    5.0
}

fn default_attempt_count() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl SenderConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }
}
