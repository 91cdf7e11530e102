// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segment Writer (§4.C): one task per camera, polling the media gateway's
//! HLS playlist, writing out fMP4 files, and feeding the Index Store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{error, info, warn};
use url::Url;

use crate::config::CameraConfig;
use crate::error::IngestError;
use crate::hls;
use crate::index::IndexStore;
use crate::model::Segment;
use crate::recovery::RecoveryTracker;

/// Fixed poll tick between empty polls, independent of segment duration.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Sleep applied once the error threshold trips, on top of the backoff,
/// giving the gateway time to come back after a restart or cert rotation.
const RECOVERY_SLEEP: Duration = Duration::from_secs(5);

/// Per-camera Segment Writer task handle.
pub struct SegmentWriter {
    camera: CameraConfig,
    base_path: PathBuf,
    segment_duration_ms: u32,
    index: IndexStore,
    recovery: RecoveryTracker,
    client: Client,
}

impl SegmentWriter {
    pub fn new(
        camera: CameraConfig,
        base_path: PathBuf,
        segment_duration_ms: u32,
        fetch_timeout: Duration,
        index: IndexStore,
        recovery: RecoveryTracker,
    ) -> Self {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            camera,
            base_path,
            segment_duration_ms,
            index,
            recovery,
            client,
        }
    }

    pub fn spawn(self, shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(camera = %self.camera.id, url = %self.camera.hls_url, "segment writer started");

        let mut seen: HashSet<String> = HashSet::new();
        let mut init_segment: Option<(String, Vec<u8>)> = None;
        let mut had_error = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once(&mut seen, &mut init_segment).await {
                Ok(found) => {
                    if had_error {
                        self.recovery.mark_recovered(&self.camera.id).await;
                        had_error = false;
                    }
                    if found == 0 {
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
                Err(kind) => {
                    had_error = true;
                    let trigger = self
                        .recovery
                        .record_error(&self.camera.id, kind.into(), kind.to_string())
                        .await;
                    tokio::select! {
                        _ = tokio::time::sleep(kind.backoff()) => {}
                        _ = shutdown.changed() => {}
                    }
                    if trigger {
                        warn!(camera = %self.camera.id, error = %kind, "error threshold reached, evicting cached init segment and pausing for recovery");
                        init_segment = None;
                        tokio::select! {
                            _ = tokio::time::sleep(RECOVERY_SLEEP) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                }
            }
        }

        info!(camera = %self.camera.id, "segment writer stopped");
    }

    /// One poll iteration: fetch the media playlist, write any new segments,
    /// and report how many were written. Returns an [`IngestError`] on any
    /// network or write failure so the caller can classify and back off.
    async fn poll_once(
        &self,
        seen: &mut HashSet<String>,
        init_segment: &mut Option<(String, Vec<u8>)>,
    ) -> Result<usize, IngestError> {
        let base = Url::parse(&self.camera.hls_url).map_err(|_| IngestError::Unknown)?;

        let root_body = self.fetch_text(&base).await?;
        let media_url = hls::resolve_media_playlist_url(&base, &root_body)
            .map_err(|_| IngestError::Unknown)?;

        let media_body = if media_url == base {
            root_body
        } else {
            self.fetch_text(&media_url).await?
        };

        let parsed = hls::parse_media_playlist(&media_body);

        if let Some(uri) = hls::extract_init_segment_uri(&media_body) {
            let needs_fetch = init_segment
                .as_ref()
                .map(|(cached, _)| cached != uri)
                .unwrap_or(true);
            if needs_fetch {
                let init_url = media_url.join(uri).map_err(|_| IngestError::Unknown)?;
                let bytes = self.fetch_bytes(&init_url).await?;
                *init_segment = Some((uri.to_string(), bytes));
            }
        }

        // URL-set differencing (§4.C): novelty is determined by which URIs
        // have not been seen before, not by the media-sequence number, since
        // the gateway may reset its sequence counter on reconnect.
        let new_uris: Vec<String> = parsed
            .segment_uris
            .iter()
            .filter(|u| !seen.contains(*u))
            .cloned()
            .collect();

        let mut written = 0usize;
        for uri in &new_uris {
            let seg_url = media_url.join(uri).map_err(|_| IngestError::Unknown)?;
            let body = self.fetch_bytes(&seg_url).await?;

            let mut payload = Vec::with_capacity(
                init_segment.as_ref().map(|(_, b)| b.len()).unwrap_or(0) + body.len(),
            );
            if let Some((_, init_bytes)) = init_segment.as_ref() {
                payload.extend_from_slice(init_bytes);
            }
            payload.extend_from_slice(&body);

            let start_time_ms = Utc::now().timestamp_millis();
            let file_path = self.segment_path(start_time_ms, uri);
            self.write_file(&file_path, &payload).await?;

            let seg = Segment::new(
                self.camera.id.clone(),
                self.camera.name.clone(),
                file_path,
                start_time_ms,
                self.segment_duration_ms,
                payload.len() as u64,
            );
            if let Err(e) = self.index.insert_segment(seg).await {
                error!(camera = %self.camera.id, error = %e, "index insert failed");
            }

            seen.insert(uri.clone());
            written += 1;
        }

        // Keep the seen-set bounded to the playlist window plus a margin so
        // memory does not grow unbounded over a long-running process.
        if seen.len() > 256 {
            let keep: HashSet<String> = parsed.segment_uris.iter().cloned().collect();
            seen.retain(|u| keep.contains(u) || new_uris.contains(u));
        }

        Ok(written)
    }

    fn segment_path(&self, start_time_ms: i64, uri: &str) -> PathBuf {
        let dt = chrono::DateTime::from_timestamp_millis(start_time_ms).unwrap_or_default();
        let file_name = uri.rsplit('/').next().unwrap_or(uri);
        let token = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        self.base_path
            .join(&self.camera.id)
            .join(dt.format("%Y-%m-%d").to_string())
            .join(format!("{}_{token}.mp4", dt.format("%H-%M-%S-%3f")))
    }

    async fn write_file(&self, path: &PathBuf, data: &[u8]) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|_| IngestError::WriteFailure)?;
        }
        tokio::fs::write(path, data)
            .await
            .map_err(|_| IngestError::WriteFailure)
    }

    async fn fetch_text(&self, url: &Url) -> Result<String, IngestError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| IngestError::from_reqwest(&e))?;
        resp.error_for_status_ref()
            .map_err(|e| IngestError::from_reqwest(&e))?;
        resp.text().await.map_err(|e| IngestError::from_reqwest(&e))
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>, IngestError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| IngestError::from_reqwest(&e))?;
        resp.error_for_status_ref()
            .map_err(|e| IngestError::from_reqwest(&e))?;
        Ok(resp
            .bytes()
            .await
            .map_err(|e| IngestError::from_reqwest(&e))?
            .to_vec())
    }
}

