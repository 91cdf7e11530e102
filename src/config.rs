// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::model::RetentionPolicy;

/// Top-level configuration loaded from a TOML file (§1.A, §6).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Storage and ingest tuning (§4.C, §6).
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory under which `<camera_id>/<date>/<file>.mp4` trees live.
    pub base_path: PathBuf,
    /// Nominal per-segment duration, clamped to [2000, 4000] ms.
    #[serde(default = "default_segment_duration_ms")]
    pub segment_duration_ms: u32,
    /// Bounded channel capacity for the Index Store's single writer task.
    #[serde(default = "default_writer_queue")]
    pub writer_queue_size: usize,
    /// HTTP fetch timeout for HLS playlist/segment requests.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Optional directory tree written by an external recorder (§4.H).
    /// When absent, the External Index Scanner task is not started.
    #[serde(default)]
    pub external_index_path: Option<PathBuf>,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

/// Per-camera ingest source (§4.C).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Unique identifier used for directory/file naming and index keys.
    pub id: String,
    /// Human-readable label shown in status output.
    pub name: String,
    /// Base HLS URL, e.g. `http://gateway/<camera_id>/index.m3u8`.
    pub hls_url: String,
    #[serde(default)]
    pub retention: Option<RetentionConfig>,
}

/// Retention and emergency-cleanup tuning (§4.E).
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_min_free_space_gb")]
    pub min_free_space_gb: u32,
    #[serde(default = "default_emergency_threshold")]
    pub emergency_cleanup_threshold: f64,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            min_free_space_gb: default_min_free_space_gb(),
            emergency_cleanup_threshold: default_emergency_threshold(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

impl RetentionConfig {
    pub fn as_policy(&self) -> RetentionPolicy {
        RetentionPolicy::clamped(
            self.retention_days,
            self.min_free_space_gb,
            self.emergency_cleanup_threshold,
        )
    }
}

/// Recovery Tracker tuning (§4.B). The thresholds are part of the contract —
/// changing them changes observable recovery cadence — but are still
/// configurable rather than hardcoded, matching the rest of the ambient stack.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RecoveryConfig {
    #[serde(default = "default_error_window_secs")]
    pub error_window_secs: i64,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_recovery_cooldown_secs")]
    pub recovery_cooldown_secs: i64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            error_window_secs: default_error_window_secs(),
            error_threshold: default_error_threshold(),
            recovery_cooldown_secs: default_recovery_cooldown_secs(),
            history_size: default_history_size(),
        }
    }
}

fn default_segment_duration_ms() -> u32 {
    3000
}
fn default_writer_queue() -> usize {
    10_000
}
fn default_fetch_timeout_secs() -> u64 {
    8
}
fn default_scan_interval_secs() -> u64 {
    30
}
fn default_retention_days() -> u32 {
    30
}
fn default_min_free_space_gb() -> u32 {
    50
}
fn default_emergency_threshold() -> f64 {
    0.90
}
fn default_cleanup_interval_hours() -> u64 {
    1
}
fn default_error_window_secs() -> i64 {
    60
}
fn default_error_threshold() -> u32 {
    5
}
fn default_recovery_cooldown_secs() -> i64 {
    30
}
fn default_history_size() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file at `path`, validating and clamping
    /// tunables that the spec pins to a range (§3, §6).
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read config file: {e}")))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid TOML: {e}")))?;
        config.validate_and_clamp();
        Ok(config)
    }

    fn validate_and_clamp(&mut self) {
        let clamped = self.storage.segment_duration_ms.clamp(2000, 4000);
        if clamped != self.storage.segment_duration_ms {
            tracing::warn!(
                configured = self.storage.segment_duration_ms,
                clamped,
                "segment_duration_ms outside [2000, 4000], clamping"
            );
            self.storage.segment_duration_ms = clamped;
        }
        self.retention = self.retention.as_policy_config();
        for camera in &mut self.cameras {
            if let Some(r) = camera.retention.as_mut() {
                *r = r.as_policy_config();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(CoreError::Config("no cameras defined".into()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.fetch_timeout_secs)
    }

    /// Effective retention config for one camera: its own override, or the
    /// process-wide default.
    pub fn retention_for(&self, camera_id: &str) -> RetentionConfig {
        self.cameras
            .iter()
            .find(|c| c.id == camera_id)
            .and_then(|c| c.retention)
            .unwrap_or(self.retention)
    }
}

impl RetentionConfig {
    fn as_policy_config(&self) -> Self {
        let p = self.as_policy();
        Self {
            retention_days: p.retention_days,
            min_free_space_gb: p.min_free_space_gb,
            emergency_cleanup_threshold: p.emergency_cleanup_threshold,
            cleanup_interval_hours: self.cleanup_interval_hours.max(1),
        }
    }
}
