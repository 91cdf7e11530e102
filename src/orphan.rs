// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Orphan Reconciler (§4.F): three passes run in sequence on a timer —
//! missing-file detection, integrity verification, and orphan re-indexing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};

use crate::config::Config;
use crate::index::IndexStore;
use crate::model::{RecoveryErrorType, Segment};

const ORPHAN_BATCH_SIZE: usize = 100;
const ORPHAN_THROTTLE: Duration = Duration::from_millis(100);
const MIN_VALID_FILE_SIZE: u64 = 1024;
const VALID_HEADER_ATOMS: [&[u8; 4]; 4] = [b"ftyp", b"moof", b"mdat", b"free"];

pub struct OrphanReconciler {
    config: Config,
    index: IndexStore,
}

impl OrphanReconciler {
    pub fn new(config: Config, index: IndexStore) -> Self {
        Self { config, index }
    }

    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(interval))
    }

    async fn run(self, interval: Duration) {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            self.verify_and_recover().await;
        }
    }

    /// Runs all three passes in order, matching the sequencing the recovery
    /// flow relies on: a file found missing in pass one must not still be
    /// treated as present when pass two checks integrity.
    pub async fn verify_and_recover(&self) {
        let missing = self.verify_indexed_files().await;
        let invalid = self.verify_file_integrity().await;
        let orphans = self.find_orphaned_files().await;
        info!(missing, invalid, orphans, "orphan reconciliation pass completed");
    }

    /// Pass 1: every indexed, valid segment whose file no longer exists on
    /// disk is marked invalid and logged as a `MissingFile` recovery event.
    async fn verify_indexed_files(&self) -> usize {
        let mut count = 0;
        for seg in self.index.all_valid_segments() {
            if !tokio::fs::try_exists(&seg.file_path).await.unwrap_or(false) {
                let _ = self.index.mark_invalid(seg.file_path.clone()).await;
                let _ = self
                    .index
                    .log_recovery_event(
                        seg.camera_id.clone(),
                        RecoveryErrorType::Unknown,
                        format!("missing file: {}", seg.file_path.display()),
                    )
                    .await;
                count += 1;
            }
        }
        count
    }

    /// Pass 2: every indexed, valid segment's file is checked against the
    /// header/size predicate; files that fail are marked invalid.
    async fn verify_file_integrity(&self) -> usize {
        let mut count = 0;
        for seg in self.index.all_valid_segments() {
            if !is_file_valid(&seg.file_path).await {
                let _ = self.index.mark_invalid(seg.file_path.clone()).await;
                let _ = self
                    .index
                    .log_recovery_event(
                        seg.camera_id.clone(),
                        RecoveryErrorType::Unknown,
                        format!("integrity check failed: {}", seg.file_path.display()),
                    )
                    .await;
                count += 1;
            }
        }
        count
    }

    /// Pass 3: walks each camera's directory tree for `.mp4` files that are
    /// not yet indexed and re-indexes a bounded batch of them, throttled so
    /// the scan does not contend with live writes.
    async fn find_orphaned_files(&self) -> usize {
        let mut count = 0;
        for camera in &self.config.cameras {
            let camera_path = self.config.storage.base_path.join(&camera.id);
            if !camera_path.exists() {
                continue;
            }

            let files = match walk_mp4_files(&camera_path).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(camera = %camera.id, error = %e, "failed to walk camera directory");
                    continue;
                }
            };

            for path in files {
                if count >= ORPHAN_BATCH_SIZE {
                    return count;
                }
                if self.index.is_indexed(&path) {
                    continue;
                }
                if !is_file_valid(&path).await {
                    continue;
                }
                if let Some(seg) = self.reindex_orphan(&camera.id, &camera.name, &path).await {
                    let _ = self.index.insert_segment(seg).await;
                    count += 1;
                    tokio::time::sleep(ORPHAN_THROTTLE).await;
                }
            }
        }
        count
    }

    async fn reindex_orphan(&self, camera_id: &str, camera_name: &str, path: &Path) -> Option<Segment> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        let start_time_ms = start_time_from_path(path).unwrap_or_else(|| {
            meta.modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(|| Utc::now().timestamp_millis())
        });

        Some(Segment::new(
            camera_id.to_string(),
            camera_name.to_string(),
            path.to_path_buf(),
            start_time_ms,
            self.config.storage.segment_duration_ms,
            meta.len(),
        ))
    }
}

/// Walks every configured camera's directory tree and indexes every
/// structurally valid file found, deriving `start_time_ms` from the
/// filename grammar where possible and falling back to file mtime. Used to
/// populate a fresh, process-local Index Store for read-only CLI commands,
/// since the Index Store itself holds no on-disk state of its own.
pub async fn rebuild_from_disk(config: &Config, index: &IndexStore) {
    for camera in &config.cameras {
        let camera_path = config.storage.base_path.join(&camera.id);
        if !camera_path.exists() {
            continue;
        }
        let files = match walk_mp4_files(&camera_path).await {
            Ok(f) => f,
            Err(e) => {
                warn!(camera = %camera.id, error = %e, "failed to walk camera directory");
                continue;
            }
        };
        for path in files {
            if !is_file_valid(&path).await {
                continue;
            }
            let meta = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let start_time_ms = start_time_from_path(&path).unwrap_or_else(|| {
                meta.modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or_else(|| Utc::now().timestamp_millis())
            });
            let seg = Segment::new(
                camera.id.clone(),
                camera.name.clone(),
                path,
                start_time_ms,
                config.storage.segment_duration_ms,
                meta.len(),
            );
            let _ = index.insert_segment(seg).await;
        }
    }
    index.flush().await;
}

/// Mirrors the external scanner's filename grammar: `HH-MM-SS-mmm-...` stem
/// under a `YYYY-MM-DD` parent directory. Returns `None` if either part
/// fails to parse, letting the caller fall back to file mtime.
fn start_time_from_path(path: &Path) -> Option<i64> {
    let date_str = path.parent()?.file_name()?.to_str()?;
    let date = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;

    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.splitn(2, '_').next()?.splitn(4, '-');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    let ms: u32 = parts.next()?.parse().ok()?;

    let time = chrono::NaiveTime::from_hms_milli_opt(h, m, s, ms)?;
    Some(date.and_time(time).and_utc().timestamp_millis())
}

async fn walk_mp4_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().map(|e| e == "mp4").unwrap_or(false) {
                out.push(path);
            }
        }
    }
    Ok(out)
}

/// A file is considered valid if it exists, is at least 1024 bytes, and its
/// first 8 bytes carry a recognizable fMP4/TS header: either one of the ISO
/// BMFF box types at offset 4, or an MPEG-TS sync byte at offset 0 (§4.F).
async fn is_file_valid(path: &Path) -> bool {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => return false,
    };

    let len = match file.metadata().await {
        Ok(m) => m.len(),
        Err(_) => return false,
    };
    if len < MIN_VALID_FILE_SIZE {
        return false;
    }

    let mut header = [0u8; 8];
    if file.seek(std::io::SeekFrom::Start(0)).await.is_err() {
        return false;
    }
    if file.read_exact(&mut header).await.is_err() {
        return false;
    }

    if header[0] == 0x47 {
        return true;
    }
    VALID_HEADER_ATOMS.iter().any(|atom| &header[4..8] == *atom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filename_grammar() {
        let path = Path::new("/data/cam1/2026-07-31/12-05-09-123_seg.mp4");
        let ms = start_time_from_path(path).expect("should parse");
        let dt = chrono::DateTime::from_timestamp_millis(ms).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2026-07-31 12:05:09.123");
    }

    #[test]
    fn rejects_malformed_filename() {
        let path = Path::new("/data/cam1/not-a-date/whatever.mp4");
        assert!(start_time_from_path(path).is_none());
    }
}
