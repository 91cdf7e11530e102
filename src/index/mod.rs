// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Index Store (§4.A): a single-writer, concurrent-reader map of
//! `(camera, time) -> segment metadata`, plus retention policies, cleanup
//! history, the recovery log, and timeline buckets.
//!
//! All mutations flow through one bounded `mpsc` channel consumed by exactly
//! one writer task — generalized from the teacher's `global_writer.rs`
//! ring-buffer writer to the full table set this system needs. Reads go
//! straight to the shared `RwLock`-guarded state and never touch the channel.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Timelike};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IndexError;
use crate::model::{
    CameraStats, CleanupRecord, RecoveryErrorType, RecoveryEvent, RetentionPolicy, Segment,
    TimelineBucket,
};

#[derive(Default)]
struct IndexTables {
    /// `(camera_id, start_time_ms) -> Segment`, keeping the uniqueness
    /// constraint from §3/§4.A as the map key itself.
    segments: HashMap<(String, i64), Segment>,
    /// Reverse lookup enforcing the independent `file_path` uniqueness
    /// constraint, and letting `mark_invalid`/`delete_segment` find a record
    /// given only a path.
    by_path: HashMap<PathBuf, (String, i64)>,
    policies: HashMap<String, RetentionPolicy>,
    cleanup_history: Vec<CleanupRecord>,
    recovery_log: VecDeque<RecoveryEvent>,
    timeline: HashMap<(String, NaiveDate, u32), TimelineBucket>,
}

const RECOVERY_LOG_CAPACITY: usize = 1000;

impl IndexTables {
    fn insert_segment(&mut self, seg: Segment) -> std::result::Result<(), IndexError> {
        let key = (seg.camera_id.clone(), seg.start_time_ms);
        if self.segments.contains_key(&key) {
            return Err(IndexError::DuplicateSegment {
                camera_id: seg.camera_id,
                start_time_ms: seg.start_time_ms,
            });
        }
        if self.by_path.contains_key(&seg.file_path) {
            return Err(IndexError::DuplicateFilePath(seg.file_path));
        }
        self.by_path.insert(seg.file_path.clone(), key.clone());
        self.upsert_timeline_bucket(&seg);
        self.segments.insert(key, seg);
        Ok(())
    }

    fn upsert_timeline_bucket(&mut self, seg: &Segment) {
        let dt = chrono::DateTime::from_timestamp_millis(seg.start_time_ms)
            .unwrap_or_default()
            .naive_utc();
        let date = dt.date();
        let hour = dt.time().hour();
        let key = (seg.camera_id.clone(), date, hour);
        self.timeline
            .entry(key)
            .and_modify(|b| {
                b.segment_count += 1;
                b.total_duration_ms += seg.duration_ms as u64;
                b.total_size_bytes += seg.file_size;
                b.last_segment_time_ms = b.last_segment_time_ms.max(seg.start_time_ms);
                b.first_segment_time_ms = b.first_segment_time_ms.min(seg.start_time_ms);
            })
            .or_insert_with(|| TimelineBucket {
                camera_id: seg.camera_id.clone(),
                date,
                hour,
                segment_count: 1,
                total_duration_ms: seg.duration_ms as u64,
                total_size_bytes: seg.file_size,
                first_segment_time_ms: seg.start_time_ms,
                last_segment_time_ms: seg.start_time_ms,
            });
    }

    fn mark_invalid(&mut self, path: &Path) {
        if let Some(key) = self.by_path.get(path) {
            if let Some(seg) = self.segments.get_mut(key) {
                seg.is_valid = false;
            }
        }
    }

    fn delete_segment(&mut self, path: &Path) {
        if let Some(key) = self.by_path.remove(path) {
            self.segments.remove(&key);
        }
    }

    fn rebuild_timeline(&mut self, camera_id: &str, start: NaiveDate, end: NaiveDate) {
        self.timeline
            .retain(|(cam, date, _), _| !(cam == camera_id && *date >= start && *date <= end));
        let segs: Vec<Segment> = self
            .segments
            .values()
            .filter(|s| s.camera_id == camera_id && s.is_valid)
            .filter(|s| {
                let date = chrono::DateTime::from_timestamp_millis(s.start_time_ms)
                    .unwrap_or_default()
                    .naive_utc()
                    .date();
                date >= start && date <= end
            })
            .cloned()
            .collect();
        for seg in segs {
            self.upsert_timeline_bucket(&seg);
        }
    }

    fn log_recovery_event(&mut self, event: RecoveryEvent) {
        if self.recovery_log.len() >= RECOVERY_LOG_CAPACITY {
            self.recovery_log.pop_front();
        }
        self.recovery_log.push_back(event);
    }

    /// Resolves the most recent unrecovered entry for `camera_id`, scanning
    /// the ring buffer newest-first (§4.B).
    fn mark_recovered(&mut self, camera_id: &str, now_ms: i64) {
        if let Some(event) = self
            .recovery_log
            .iter_mut()
            .rev()
            .find(|e| e.camera_id == camera_id && !e.recovered)
        {
            event.mark_recovered(now_ms);
        }
    }
}

/// Mutating operations, serialized through the single writer task.
pub enum IndexCommand {
    InsertSegment(Segment),
    MarkInvalid(PathBuf),
    DeleteSegment(PathBuf),
    DeleteSegmentsBatch(Vec<PathBuf>),
    UpsertPolicy(String, RetentionPolicy),
    DeletePolicy(String),
    RecordCleanup(CleanupRecord),
    LogRecoveryEvent(RecoveryEvent),
    MarkRecovered { camera_id: String, now_ms: i64 },
    RebuildTimeline {
        camera_id: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Barrier: acknowledges once every command enqueued before it has been
    /// applied. Lets a caller that just issued a burst of writes (e.g. the
    /// disk-rebuild helper) read its own writes deterministically.
    Flush(tokio::sync::oneshot::Sender<()>),
}

type SharedTables = Arc<RwLock<IndexTables>>;

/// Handle held by every component that needs to read or mutate the index.
/// Cheap to clone; mutation is fire-and-forget over the bounded channel,
/// matching the "enqueue and return" contract in §4.A.
#[derive(Clone)]
pub struct IndexStore {
    tx: mpsc::Sender<IndexCommand>,
    tables: SharedTables,
}

pub fn spawn(queue_capacity: usize) -> (IndexStore, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let tables: SharedTables = Arc::new(RwLock::new(IndexTables::default()));
    let handle = tokio::spawn(writer_loop(rx, tables.clone()));
    (IndexStore { tx, tables }, handle)
}

async fn writer_loop(mut rx: mpsc::Receiver<IndexCommand>, tables: SharedTables) {
    while let Some(cmd) = rx.recv().await {
        let mut guard = tables.write();
        match cmd {
            IndexCommand::InsertSegment(seg) => {
                if let Err(e) = guard.insert_segment(seg) {
                    tracing::warn!(error = %e, "dropping segment insert on conflict");
                }
            }
            IndexCommand::MarkInvalid(path) => guard.mark_invalid(&path),
            IndexCommand::DeleteSegment(path) => guard.delete_segment(&path),
            IndexCommand::DeleteSegmentsBatch(paths) => {
                for path in &paths {
                    guard.delete_segment(path);
                }
            }
            IndexCommand::UpsertPolicy(camera_id, policy) => {
                guard.policies.insert(camera_id, policy);
            }
            IndexCommand::DeletePolicy(camera_id) => {
                guard.policies.remove(&camera_id);
            }
            IndexCommand::RecordCleanup(record) => guard.cleanup_history.push(record),
            IndexCommand::LogRecoveryEvent(event) => guard.log_recovery_event(event),
            IndexCommand::MarkRecovered { camera_id, now_ms } => {
                guard.mark_recovered(&camera_id, now_ms)
            }
            IndexCommand::RebuildTimeline {
                camera_id,
                start,
                end,
            } => guard.rebuild_timeline(&camera_id, start, end),
            IndexCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

impl IndexStore {
    async fn send(&self, cmd: IndexCommand) -> std::result::Result<(), IndexError> {
        self.tx.send(cmd).await.map_err(|_| IndexError::WriterClosed)
    }

    pub async fn insert_segment(&self, seg: Segment) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::InsertSegment(seg)).await
    }

    pub async fn mark_invalid(&self, path: PathBuf) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::MarkInvalid(path)).await
    }

    pub async fn delete_segment(&self, path: PathBuf) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::DeleteSegment(path)).await
    }

    /// Preferred over repeated `delete_segment` calls once the caller has
    /// more than ~100 paths (§4.A) — commits as a single writer-task batch.
    pub async fn delete_segments_batch(
        &self,
        paths: Vec<PathBuf>,
    ) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::DeleteSegmentsBatch(paths)).await
    }

    pub async fn upsert_policy(
        &self,
        camera_id: impl Into<String>,
        policy: RetentionPolicy,
    ) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::UpsertPolicy(camera_id.into(), policy))
            .await
    }

    pub async fn delete_policy(
        &self,
        camera_id: impl Into<String>,
    ) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::DeletePolicy(camera_id.into())).await
    }

    pub async fn record_cleanup(
        &self,
        record: CleanupRecord,
    ) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::RecordCleanup(record)).await
    }

    pub async fn log_recovery_event(
        &self,
        camera_id: impl Into<String>,
        error_type: RecoveryErrorType,
        message: impl Into<String>,
    ) -> std::result::Result<(), IndexError> {
        let event = RecoveryEvent {
            camera_id: camera_id.into(),
            error_type,
            message: message.into(),
            error_ts_ms: chrono::Utc::now().timestamp_millis(),
            recovered: false,
            recovery_ts_ms: None,
        };
        self.send(IndexCommand::LogRecoveryEvent(event)).await
    }

    /// Waits for every command sent before this call to be applied.
    pub async fn flush(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.send(IndexCommand::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn mark_recovered(
        &self,
        camera_id: impl Into<String>,
    ) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::MarkRecovered {
            camera_id: camera_id.into(),
            now_ms: chrono::Utc::now().timestamp_millis(),
        })
        .await
    }

    pub async fn rebuild_timeline(
        &self,
        camera_id: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<(), IndexError> {
        self.send(IndexCommand::RebuildTimeline {
            camera_id: camera_id.into(),
            start,
            end,
        })
        .await
    }

    // --- read path: concurrent with the writer, never touches the channel ---

    /// Segments for `camera` with `start_time_ms in [t0, t1)` and `is_valid`,
    /// ordered ascending by `start_time_ms` (§4.A).
    pub fn segments_in_range(&self, camera_id: &str, t0: i64, t1: i64) -> Vec<Segment> {
        let guard = self.tables.read();
        let mut out: Vec<Segment> = guard
            .segments
            .values()
            .filter(|s| {
                s.camera_id == camera_id && s.is_valid && s.start_time_ms >= t0 && s.start_time_ms < t1
            })
            .cloned()
            .collect();
        out.sort_by_key(|s| s.start_time_ms);
        out
    }

    /// The valid segment covering instant `t`, if any.
    pub fn segment_at(&self, camera_id: &str, t: i64) -> Option<Segment> {
        let guard = self.tables.read();
        guard
            .segments
            .values()
            .find(|s| {
                s.camera_id == camera_id
                    && s.is_valid
                    && s.start_time_ms <= t
                    && t < s.end_time_ms
            })
            .cloned()
    }

    /// Segments older than `before` (ms), optionally filtered to one camera,
    /// ordered ascending by `start_time_ms` — used by the Retention Engine.
    pub fn old_segments(&self, before_ms: i64, camera_id: Option<&str>) -> Vec<Segment> {
        let guard = self.tables.read();
        let mut out: Vec<Segment> = guard
            .segments
            .values()
            .filter(|s| s.is_valid && s.start_time_ms < before_ms)
            .filter(|s| camera_id.map(|c| c == s.camera_id).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.start_time_ms);
        out
    }

    /// All valid segments, any camera — used by Orphan Reconciler passes.
    pub fn all_valid_segments(&self) -> Vec<Segment> {
        self.tables
            .read()
            .segments
            .values()
            .filter(|s| s.is_valid)
            .cloned()
            .collect()
    }

    pub fn is_indexed(&self, path: &Path) -> bool {
        self.tables.read().by_path.contains_key(path)
    }

    pub fn camera_stats(&self, camera_id: &str) -> CameraStats {
        let guard = self.tables.read();
        let mut stats = CameraStats::default();
        for seg in guard.segments.values().filter(|s| s.camera_id == camera_id && s.is_valid) {
            stats.segment_count += 1;
            stats.total_duration_ms += seg.duration_ms as u64;
            stats.total_size_bytes += seg.file_size;
            stats.earliest_start_ms = Some(
                stats
                    .earliest_start_ms
                    .map_or(seg.start_time_ms, |e: i64| e.min(seg.start_time_ms)),
            );
            stats.latest_start_ms = Some(
                stats
                    .latest_start_ms
                    .map_or(seg.start_time_ms, |l: i64| l.max(seg.start_time_ms)),
            );
        }
        stats
    }

    pub fn get_policy(&self, camera_id: &str) -> Option<RetentionPolicy> {
        self.tables.read().policies.get(camera_id).copied()
    }

    pub fn get_all_policies(&self) -> Vec<(String, RetentionPolicy)> {
        self.tables
            .read()
            .policies
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn get_cleanup_history(&self, camera_id: Option<&str>, limit: usize) -> Vec<CleanupRecord> {
        let guard = self.tables.read();
        let mut out: Vec<CleanupRecord> = guard
            .cleanup_history
            .iter()
            .filter(|r| camera_id.map(|c| c == r.camera_id).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|r| std::cmp::Reverse(r.timestamp_ms));
        out.truncate(limit);
        out
    }

    /// Most recent `limit` recovery-log entries, optionally filtered to one
    /// camera, newest first (§4.B).
    pub fn get_recovery_log(&self, camera_id: Option<&str>, limit: usize) -> Vec<RecoveryEvent> {
        let guard = self.tables.read();
        guard
            .recovery_log
            .iter()
            .rev()
            .filter(|e| camera_id.map(|c| c == e.camera_id).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_timeline(&self, camera_id: &str, start: NaiveDate, end: NaiveDate) -> Vec<TimelineBucket> {
        let guard = self.tables.read();
        let mut out: Vec<TimelineBucket> = guard
            .timeline
            .values()
            .filter(|b| b.camera_id == camera_id && b.date >= start && b.date <= end)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.date, a.hour).cmp(&(b.date, b.hour)));
        out
    }

    pub fn get_hourly_summary(&self, camera_id: &str, date: NaiveDate) -> Vec<TimelineBucket> {
        self.get_timeline(camera_id, date, date)
    }
}
