// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Core data model: segments, retention policies, timeline buckets, and the
//! append-only cleanup/recovery logs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One archived unit of recording.
///
/// Identity is `(camera_id, start_time_ms)`; `file_path` is independently unique.
/// Not mutated after creation except for `is_valid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub camera_id: String,
    pub camera_name: String,
    pub file_path: PathBuf,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub duration_ms: u32,
    pub file_size: u64,
    pub codec: Option<String>,
    pub resolution: Option<String>,
    pub bitrate: Option<u32>,
    pub keyframe_count: Option<u32>,
    pub is_valid: bool,
}

impl Segment {
    pub fn new(
        camera_id: impl Into<String>,
        camera_name: impl Into<String>,
        file_path: PathBuf,
        start_time_ms: i64,
        duration_ms: u32,
        file_size: u64,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            camera_name: camera_name.into(),
            file_path,
            start_time_ms,
            end_time_ms: start_time_ms + duration_ms as i64,
            duration_ms,
            file_size,
            codec: None,
            resolution: None,
            bitrate: None,
            keyframe_count: None,
            is_valid: true,
        }
    }
}

/// Per-camera retention configuration. `retention_days` is clamped to `[7, 90]`,
/// `min_free_space_gb` to `[10, 500]`, `emergency_cleanup_threshold` to `[0.80, 0.99]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub min_free_space_gb: u32,
    pub emergency_cleanup_threshold: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            min_free_space_gb: 50,
            emergency_cleanup_threshold: 0.90,
        }
    }
}

impl RetentionPolicy {
    /// Clamps every field into its contractual range (§3). The 7-day floor
    /// replaces an earlier 30-day floor used in some call sites upstream.
    pub fn clamped(
        retention_days: u32,
        min_free_space_gb: u32,
        emergency_cleanup_threshold: f64,
    ) -> Self {
        Self {
            retention_days: retention_days.clamp(7, 90),
            min_free_space_gb: min_free_space_gb.clamp(10, 500),
            emergency_cleanup_threshold: emergency_cleanup_threshold.clamp(0.80, 0.99),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupType {
    Scheduled,
    Emergency,
    Manual,
}

/// Append-only cleanup history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub camera_id: String,
    pub deleted_segments: u64,
    pub freed_bytes: u64,
    pub cleanup_type: CleanupType,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryErrorType {
    WriteFailure,
    Timeout,
    StreamDisconnect,
    FileLock,
    Unknown,
}

/// One entry in the bounded recovery-event ring buffer (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub camera_id: String,
    pub error_type: RecoveryErrorType,
    pub message: String,
    pub error_ts_ms: i64,
    pub recovered: bool,
    pub recovery_ts_ms: Option<i64>,
}

impl RecoveryEvent {
    pub fn mark_recovered(&mut self, now_ms: i64) {
        self.recovered = true;
        self.recovery_ts_ms = Some(now_ms);
    }
}

/// `(camera_id, date, hour)` aggregate for fast scrubber navigation (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub camera_id: String,
    pub date: chrono::NaiveDate,
    pub hour: u32,
    pub segment_count: u64,
    pub total_duration_ms: u64,
    pub total_size_bytes: u64,
    pub first_segment_time_ms: i64,
    pub last_segment_time_ms: i64,
}

/// Aggregate counters returned by `camera_stats` (§4.A).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CameraStats {
    pub segment_count: u64,
    pub total_duration_ms: u64,
    pub total_size_bytes: u64,
    pub earliest_start_ms: Option<i64>,
    pub latest_start_ms: Option<i64>,
}
