// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Retention Engine and Emergency Cleanup (§4.E), plus the disk and
//! per-camera usage snapshots they act on (§3.A).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::index::IndexStore;
use crate::model::{CleanupRecord, CleanupType};

const DELETE_BATCH_SIZE: usize = 1000;
const STARTUP_GRACE: Duration = Duration::from_secs(5 * 60);
const EMERGENCY_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);
const EMERGENCY_WATERMARK: f64 = 0.90;
const EMERGENCY_RECOVERY_WATERMARK: f64 = 0.85;
const PER_CAMERA_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Disk-space metrics for the storage volume (§3.A).
#[derive(Debug, Clone, Copy)]
pub struct DiskMetrics {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub percent_used: f64,
}

impl DiskMetrics {
    fn read(path: &Path) -> std::io::Result<Self> {
        let total_bytes = fs2::total_space(path)?;
        let free_bytes = fs2::available_space(path)?;
        let used_bytes = total_bytes.saturating_sub(free_bytes);
        let percent_used = if total_bytes > 0 {
            used_bytes as f64 / total_bytes as f64
        } else {
            0.0
        };
        Ok(Self {
            total_bytes,
            free_bytes,
            used_bytes,
            percent_used,
        })
    }
}

/// Per-camera storage footprint snapshot (§3.A).
#[derive(Debug, Clone)]
pub struct CameraUsage {
    pub camera_id: String,
    pub total_bytes: u64,
    pub segment_count: u64,
}

/// Runs the scheduled Retention Engine sweep and the Emergency Cleanup
/// watcher. Both act on the same Index Store and filesystem tree, so they
/// share one struct to avoid two independent deletion paths racing.
pub struct RetentionEngine {
    config: Config,
    index: IndexStore,
    last_emergency_run: std::collections::HashMap<String, std::time::Instant>,
}

impl RetentionEngine {
    pub fn new(config: Config, index: IndexStore) -> Self {
        Self {
            config,
            index,
            last_emergency_run: std::collections::HashMap::new(),
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("retention engine started, grace period before first sweep");
        tokio::time::sleep(STARTUP_GRACE).await;

        let mut scheduled_tick = tokio::time::interval(Duration::from_secs(
            self.config.retention.cleanup_interval_hours * 3600,
        ));
        let mut emergency_tick = tokio::time::interval(EMERGENCY_SAMPLE_INTERVAL);

        loop {
            tokio::select! {
                _ = scheduled_tick.tick() => {
                    self.run_scheduled_sweep().await;
                }
                _ = emergency_tick.tick() => {
                    self.check_emergency().await;
                }
            }
        }
    }

    /// Runs the same batched deletion routine as a scheduled sweep, but
    /// immediately and for a single camera, against its current policy
    /// cutoff. Grounded in `retention_manager.py::force_cleanup` (§4.E).
    pub async fn force_cleanup(&self, camera_id: &str) -> (u64, u64) {
        let policy = self
            .index
            .get_policy(camera_id)
            .unwrap_or_else(|| self.config.retention_for(camera_id).as_policy());
        let cutoff_ms = Utc::now().timestamp_millis() - policy.retention_days as i64 * 86_400_000;
        self.delete_older_than(camera_id, cutoff_ms, CleanupType::Manual)
            .await
    }

    /// Age-based deletion for every camera with a policy (§4.E).
    async fn run_scheduled_sweep(&self) {
        for (camera_id, policy) in self.index.get_all_policies() {
            let cutoff_ms =
                Utc::now().timestamp_millis() - policy.retention_days as i64 * 86_400_000;
            self.delete_older_than(&camera_id, cutoff_ms, CleanupType::Scheduled)
                .await;
        }
    }

    async fn delete_older_than(&self, camera_id: &str, cutoff_ms: i64, kind: CleanupType) -> (u64, u64) {
        let stale = self.index.old_segments(cutoff_ms, Some(camera_id));
        if stale.is_empty() {
            return (0, 0);
        }

        let mut deleted = 0u64;
        let mut freed = 0u64;
        for batch in stale.chunks(DELETE_BATCH_SIZE) {
            let mut paths = Vec::with_capacity(batch.len());
            for seg in batch {
                if tokio::fs::remove_file(&seg.file_path).await.is_ok() {
                    deleted += 1;
                    freed += seg.file_size;
                }
                paths.push(seg.file_path.clone());
            }
            let _ = self.index.delete_segments_batch(paths).await;
        }

        if deleted > 0 {
            info!(camera = camera_id, deleted, freed, ?kind, "retention cleanup completed");
            let _ = self
                .index
                .record_cleanup(CleanupRecord {
                    camera_id: camera_id.to_string(),
                    deleted_segments: deleted,
                    freed_bytes: freed,
                    cleanup_type: kind,
                    timestamp_ms: Utc::now().timestamp_millis(),
                })
                .await;
        }
        (deleted, freed)
    }

    /// Samples disk usage and, when above the high watermark, deletes from
    /// the camera with the highest configured retention first, using half
    /// its effective retention window, until usage drops below the recovery
    /// watermark or every camera has been tried (§4.E).
    async fn check_emergency(&mut self) {
        let metrics = match DiskMetrics::read(&self.config.storage.base_path) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to read disk metrics");
                return;
            }
        };

        if metrics.percent_used < EMERGENCY_WATERMARK {
            return;
        }

        warn!(percent_used = metrics.percent_used, "emergency cleanup threshold exceeded");

        let mut policies = self.index.get_all_policies();
        policies.sort_by(|a, b| b.1.retention_days.cmp(&a.1.retention_days));

        let now = std::time::Instant::now();
        for (camera_id, policy) in policies {
            if metrics.percent_used < EMERGENCY_RECOVERY_WATERMARK {
                break;
            }
            if let Some(last) = self.last_emergency_run.get(&camera_id) {
                if now.duration_since(*last) < PER_CAMERA_COOLDOWN {
                    continue;
                }
            }

            let effective_days = (policy.retention_days / 2).max(1);
            let cutoff_ms = Utc::now().timestamp_millis() - effective_days as i64 * 86_400_000;
            self.delete_older_than(&camera_id, cutoff_ms, CleanupType::Emergency)
                .await;
            self.last_emergency_run.insert(camera_id, now);

            if let Ok(refreshed) = DiskMetrics::read(&self.config.storage.base_path) {
                if refreshed.percent_used < EMERGENCY_RECOVERY_WATERMARK {
                    break;
                }
            }
        }
    }
}

/// Total bytes and segment count on disk for `camera_id`, walking the
/// camera's directory tree directly rather than trusting the index alone —
/// used by status reporting (§3.A).
pub async fn camera_usage(base_path: &Path, camera_id: &str) -> std::io::Result<CameraUsage> {
    let camera_path: PathBuf = base_path.join(camera_id);
    let mut total_bytes = 0u64;
    let mut segment_count = 0u64;

    if !camera_path.exists() {
        return Ok(CameraUsage {
            camera_id: camera_id.to_string(),
            total_bytes,
            segment_count,
        });
    }

    let mut stack = vec![camera_path];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().map(|e| e == "mp4").unwrap_or(false) {
                if let Ok(meta) = entry.metadata().await {
                    total_bytes += meta.len();
                    segment_count += 1;
                }
            }
        }
    }

    Ok(CameraUsage {
        camera_id: camera_id.to_string(),
        total_bytes,
        segment_count,
    })
}

pub fn disk_metrics(base_path: &Path) -> std::io::Result<DiskMetrics> {
    DiskMetrics::read(base_path)
}
