// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! External Index Scanner (§4.H): periodically walks a directory tree
//! written by a recorder outside this process and indexes any files not yet
//! seen. Only runs when `storage.external_index_path` is configured.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::index::IndexStore;
use crate::model::Segment;

/// Fixed nominal duration assigned to every externally-indexed file. The
/// recorder writing these files accumulates fragments into a single growing
/// fMP4 container, so a probed duration would reflect the container's size
/// at scan time rather than any one recording's actual length.
const EXTERNAL_SEGMENT_DURATION_MS: u32 = 3000;

pub struct ExternalIndexScanner {
    config: Config,
    index: IndexStore,
    seen: HashSet<PathBuf>,
}

impl ExternalIndexScanner {
    pub fn new(config: Config, index: IndexStore) -> Self {
        Self {
            config,
            index,
            seen: HashSet::new(),
        }
    }

    /// Returns `None` if no external path is configured, so the caller can
    /// skip spawning the task entirely.
    pub fn spawn(self) -> Option<tokio::task::JoinHandle<()>> {
        self.config.storage.external_index_path.clone()?;
        Some(tokio::spawn(self.run()))
    }

    async fn run(mut self) {
        let interval_secs = self.config.storage.scan_interval_secs;
        loop {
            self.scan_once().await;
            // Sleep in 1s increments so a shutdown signal would be noticed
            // quickly rather than after the full interval, matching the
            // responsiveness the source implementation's scan loop had.
            for _ in 0..interval_secs {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    async fn scan_once(&mut self) {
        let Some(root) = self.config.storage.external_index_path.clone() else {
            return;
        };

        let cameras = self.config.cameras.clone();
        for camera in &cameras {
            let camera_root = root.join(&camera.id);
            if !camera_root.exists() {
                continue;
            }
            if let Err(e) = self.scan_camera(&camera.id, &camera.name, &camera_root).await {
                warn!(camera = %camera.id, error = %e, "external scan failed");
            }
        }
    }

    async fn scan_camera(&mut self, camera_id: &str, camera_name: &str, camera_root: &Path) -> std::io::Result<()> {
        let mut date_dirs = tokio::fs::read_dir(camera_root).await?;
        while let Some(date_entry) = date_dirs.next_entry().await? {
            if !date_entry.path().is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(date_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let path = file_entry.path();
                if path.extension().map(|e| e != "mp4").unwrap_or(true) {
                    continue;
                }
                if self.seen.contains(&path) || self.index.is_indexed(&path) {
                    continue;
                }
                self.index_file(camera_id, camera_name, &path).await;
            }
        }
        Ok(())
    }

    async fn index_file(&mut self, camera_id: &str, camera_name: &str, path: &Path) {
        let Some(start_time_ms) = parse_start_time(path) else {
            warn!(path = %path.display(), "skipping file with unparseable name");
            return;
        };
        let file_size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

        let seg = Segment::new(
            camera_id.to_string(),
            camera_name.to_string(),
            path.to_path_buf(),
            start_time_ms,
            EXTERNAL_SEGMENT_DURATION_MS,
            file_size,
        );

        match self.index.insert_segment(seg).await {
            Ok(()) => {
                self.seen.insert(path.to_path_buf());
                info!(camera = camera_id, path = %path.display(), "external recording indexed");
            }
            Err(e) => {
                self.seen.insert(path.to_path_buf());
                warn!(camera = camera_id, error = %e, "external recording index conflict");
            }
        }
    }

    pub fn indexed_count(&self) -> usize {
        self.seen.len()
    }

    pub fn clear_cache(&mut self) {
        self.seen.clear();
    }
}

/// Filename grammar: stem's first `_`-separated part is `HH-MM-SS-mmm`; the
/// date comes from the immediate parent directory, `YYYY-MM-DD`.
fn parse_start_time(path: &Path) -> Option<i64> {
    let date_str = path.parent()?.file_name()?.to_str()?;
    let date = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;

    let stem = path.file_stem()?.to_str()?;
    let time_part = stem.split('_').next()?;
    let mut fields = time_part.splitn(4, '-');
    let h: u32 = fields.next()?.parse().ok()?;
    let m: u32 = fields.next()?.parse().ok()?;
    let s: u32 = fields.next()?.parse().ok()?;
    let ms: u32 = fields.next()?.parse().ok()?;

    let time = chrono::NaiveTime::from_hms_milli_opt(h, m, s, ms)?;
    Some(date.and_time(time).and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_filename() {
        let path = Path::new("/mediamtx/cam2/2026-07-31/14-22-05-500_rec.mp4");
        let ms = parse_start_time(path).expect("should parse");
        let dt = chrono::DateTime::from_timestamp_millis(ms).unwrap();
        assert_eq!(dt.format("%H:%M:%S%.3f").to_string(), "14:22:05.500");
    }

    #[test]
    fn rejects_bad_date_directory() {
        let path = Path::new("/mediamtx/cam2/not-a-date/14-22-05-500_rec.mp4");
        assert!(parse_start_time(path).is_none());
    }
}
