// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Supervisor: wires the Index Store, Recovery Tracker, per-camera Segment
//! Writers, Retention Engine, Orphan Reconciler, and External Index Scanner
//! into one running system, and owns graceful shutdown.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::index::{self, IndexStore};
use crate::ingest::SegmentWriter;
use crate::orphan::OrphanReconciler;
use crate::recovery::RecoveryTracker;
use crate::retention::RetentionEngine;
use crate::scanner::ExternalIndexScanner;

const ORPHAN_RECONCILE_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub struct Supervisor {
    config: Config,
    pub index: IndexStore,
    pub recovery: RecoveryTracker,
    writer_handle: JoinHandle<()>,
    segment_writers: Vec<JoinHandle<()>>,
    retention_handle: JoinHandle<()>,
    orphan_handle: JoinHandle<()>,
    scanner_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.base_path)
            .map_err(|e| CoreError::Storage(format!("cannot create base_path: {e}")))?;

        let (index, writer_handle) = index::spawn(config.storage.writer_queue_size);

        for camera in &config.cameras {
            let policy = config.retention_for(&camera.id).as_policy();
            let _ = index.upsert_policy(camera.id.clone(), policy).await;
        }

        let recovery = RecoveryTracker::new(config.recovery, index.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut segment_writers = Vec::with_capacity(config.cameras.len());
        for camera in &config.cameras {
            let writer = SegmentWriter::new(
                camera.clone(),
                config.storage.base_path.clone(),
                config.storage.segment_duration_ms,
                config.fetch_timeout(),
                index.clone(),
                recovery.clone(),
            );
            segment_writers.push(writer.spawn(shutdown_rx.clone()));
            info!(camera = %camera.id, name = %camera.name, "segment writer registered");
        }

        let retention_handle = RetentionEngine::new(config.clone(), index.clone()).spawn();
        let orphan_handle = OrphanReconciler::new(config.clone(), index.clone())
            .spawn(ORPHAN_RECONCILE_INTERVAL);
        let scanner_handle = ExternalIndexScanner::new(config.clone(), index.clone()).spawn();

        Ok(Self {
            config,
            index,
            recovery,
            writer_handle,
            segment_writers,
            retention_handle,
            orphan_handle,
            scanner_handle,
            shutdown_tx,
        })
    }

    pub fn cameras(&self) -> &[crate::config::CameraConfig] {
        &self.config.cameras
    }

    /// Signals every Segment Writer to stop, then aborts the background
    /// engines and the Index Store's writer task. Segment Writers get a
    /// cooperative signal since they may be mid-write; the rest are purely
    /// periodic and safe to abort outright.
    pub async fn shutdown(self) {
        info!("supervisor shutting down");
        let _ = self.shutdown_tx.send(true);
        for handle in self.segment_writers {
            let _ = handle.await;
        }
        self.retention_handle.abort();
        self.orphan_handle.abort();
        if let Some(handle) = self.scanner_handle {
            handle.abort();
        }
        drop(self.recovery);
        drop(self.index);
        let _ = self.writer_handle.await;
        info!("supervisor stopped");
    }
}
