// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Recovery Tracker (§4.B): per-camera sliding error window, threshold-based
//! auto-recovery decision, and the append-only recovery-event log exposed
//! through the Index Store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RecoveryConfig;
use crate::index::IndexStore;
use crate::model::RecoveryErrorType;

#[derive(Debug, Clone, Copy, Default)]
struct CameraState {
    error_count: u32,
    recovery_count: u32,
    last_error_ts_ms: Option<i64>,
    last_recovery_ts_ms: Option<i64>,
}

/// Per-camera status snapshot (§4.B supplement).
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryStatus {
    pub error_count: u32,
    pub recovery_count: u32,
    pub last_error_ts_ms: Option<i64>,
    pub last_recovery_ts_ms: Option<i64>,
}

/// Shared across every Segment Writer task; cheap to clone.
#[derive(Clone)]
pub struct RecoveryTracker {
    config: RecoveryConfig,
    index: IndexStore,
    state: Arc<Mutex<HashMap<String, CameraState>>>,
}

impl RecoveryTracker {
    pub fn new(config: RecoveryConfig, index: IndexStore) -> Self {
        Self {
            config,
            index,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records one error for `camera_id` and decides whether the caller
    /// should run the recovery action (§4.B decision rule). Also appends a
    /// `RecoveryEvent` to the Index Store's recovery log.
    pub async fn record_error(
        &self,
        camera_id: &str,
        error_type: RecoveryErrorType,
        message: impl Into<String>,
    ) -> bool {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let should_recover = {
            let mut states = self.state.lock();
            let state = states.entry(camera_id.to_string()).or_default();

            let since_last_error = state
                .last_error_ts_ms
                .map(|t| now_ms - t)
                .unwrap_or(i64::MAX);

            let mut trigger = false;
            if since_last_error > self.config.error_window_secs * 1000 {
                state.error_count = 1;
            } else {
                state.error_count += 1;
                let since_last_recovery = state
                    .last_recovery_ts_ms
                    .map(|t| now_ms - t)
                    .unwrap_or(i64::MAX);
                if state.error_count >= self.config.error_threshold
                    && since_last_recovery >= self.config.recovery_cooldown_secs * 1000
                {
                    state.last_recovery_ts_ms = Some(now_ms);
                    state.recovery_count += 1;
                    trigger = true;
                }
            }
            state.last_error_ts_ms = Some(now_ms);
            trigger
        };

        let _ = self
            .index
            .log_recovery_event(camera_id, error_type, message)
            .await;

        should_recover
    }

    /// Resets the camera's error count to 0 and resolves the most recent
    /// unrecovered event for it in the recovery log (§4.B). Called by the
    /// Segment Writer after the first successful write following a recovery.
    pub async fn mark_recovered(&self, camera_id: &str) {
        {
            let mut states = self.state.lock();
            if let Some(state) = states.get_mut(camera_id) {
                state.error_count = 0;
            }
        }
        let _ = self.index.mark_recovered(camera_id).await;
    }

    pub fn status(&self, camera_id: &str) -> RecoveryStatus {
        let states = self.state.lock();
        states
            .get(camera_id)
            .map(|s| RecoveryStatus {
                error_count: s.error_count,
                recovery_count: s.recovery_count,
                last_error_ts_ms: s.last_error_ts_ms,
                last_recovery_ts_ms: s.last_recovery_ts_ms,
            })
            .unwrap_or_default()
    }

    pub fn all_status(&self) -> HashMap<String, RecoveryStatus> {
        self.state
            .lock()
            .iter()
            .map(|(k, s)| {
                (
                    k.clone(),
                    RecoveryStatus {
                        error_count: s.error_count,
                        recovery_count: s.recovery_count,
                        last_error_ts_ms: s.last_error_ts_ms,
                        last_recovery_ts_ms: s.last_recovery_ts_ms,
                    },
                )
            })
            .collect()
    }

    pub fn history(&self, camera_id: Option<&str>, limit: usize) -> Vec<crate::model::RecoveryEvent> {
        self.index.get_recovery_log(camera_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> RecoveryTracker {
        let (index, _handle) = crate::index::spawn(64);
        RecoveryTracker::new(RecoveryConfig::default(), index)
    }

    #[tokio::test]
    async fn does_not_trigger_below_threshold() {
        let t = tracker();
        for _ in 0..4 {
            assert!(!t.record_error("cam1", RecoveryErrorType::Timeout, "x").await);
        }
    }

    #[tokio::test]
    async fn triggers_at_threshold() {
        let t = tracker();
        let mut triggered = false;
        for _ in 0..5 {
            triggered = t.record_error("cam1", RecoveryErrorType::Timeout, "x").await;
        }
        assert!(triggered);
    }

    #[tokio::test]
    async fn cooldown_blocks_immediate_retrigger() {
        let t = tracker();
        for _ in 0..5 {
            t.record_error("cam1", RecoveryErrorType::Timeout, "x").await;
        }
        for _ in 0..5 {
            assert!(!t.record_error("cam1", RecoveryErrorType::Timeout, "x").await);
        }
    }
}
