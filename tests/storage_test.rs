// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Index Store integration tests: insert/read paths, uniqueness
//! constraints, retention queries, recovery log, and timeline buckets.

use std::path::PathBuf;

use nvr_core::model::{CleanupRecord, CleanupType, RecoveryErrorType, RetentionPolicy, Segment};

fn seg(camera: &str, path: &str, start_ms: i64, duration_ms: u32, size: u64) -> Segment {
    Segment::new(camera, "Camera One", PathBuf::from(path), start_ms, duration_ms, size)
}

#[tokio::test]
async fn insert_and_query_segments_in_range() {
    let (index, _handle) = nvr_core::index::spawn(16);

    index.insert_segment(seg("cam1", "a.mp4", 1000, 3000, 500)).await.unwrap();
    index.insert_segment(seg("cam1", "b.mp4", 4000, 3000, 500)).await.unwrap();
    index.insert_segment(seg("cam1", "c.mp4", 9000, 3000, 500)).await.unwrap();

    // flush() waits for every send above to be applied before the read path
    // (a separate RwLock-guarded view) is queried.
    index.flush().await;

    let segments = index.segments_in_range("cam1", 0, 8000);
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].start_time_ms, 1000);
    assert_eq!(segments[1].start_time_ms, 4000);
}

#[tokio::test]
async fn duplicate_start_time_is_rejected() {
    let (index, _handle) = nvr_core::index::spawn(16);

    index.insert_segment(seg("cam1", "a.mp4", 1000, 3000, 500)).await.unwrap();
    let err = index
        .insert_segment(seg("cam1", "a-dup.mp4", 1000, 3000, 500))
        .await;
    assert!(err.is_ok(), "send itself succeeds; rejection happens inside the writer");

    index.flush().await;
    let segments = index.segments_in_range("cam1", 0, 5000);
    assert_eq!(segments.len(), 1, "the duplicate must not have been inserted");
}

#[tokio::test]
async fn mark_invalid_excludes_segment_from_range_queries() {
    let (index, _handle) = nvr_core::index::spawn(16);
    index.insert_segment(seg("cam1", "a.mp4", 1000, 3000, 500)).await.unwrap();
    index.flush().await;

    index.mark_invalid(PathBuf::from("a.mp4")).await.unwrap();
    index.flush().await;

    assert!(index.segments_in_range("cam1", 0, 5000).is_empty());
}

#[tokio::test]
async fn retention_policy_round_trips() {
    let (index, _handle) = nvr_core::index::spawn(16);
    let policy = RetentionPolicy::clamped(45, 80, 0.92);
    index.upsert_policy("cam1", policy).await.unwrap();
    index.flush().await;

    assert_eq!(index.get_policy("cam1"), Some(policy));
}

#[tokio::test]
async fn old_segments_filters_by_cutoff_and_camera() {
    let (index, _handle) = nvr_core::index::spawn(16);
    index.insert_segment(seg("cam1", "old.mp4", 1_000, 3000, 500)).await.unwrap();
    index.insert_segment(seg("cam1", "new.mp4", 10_000_000, 3000, 500)).await.unwrap();
    index.insert_segment(seg("cam2", "other.mp4", 1_000, 3000, 500)).await.unwrap();
    index.flush().await;

    let stale = index.old_segments(5_000_000, Some("cam1"));
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].file_path, PathBuf::from("old.mp4"));
}

#[tokio::test]
async fn cleanup_history_orders_newest_first() {
    let (index, _handle) = nvr_core::index::spawn(16);
    index
        .record_cleanup(CleanupRecord {
            camera_id: "cam1".into(),
            deleted_segments: 3,
            freed_bytes: 300,
            cleanup_type: CleanupType::Scheduled,
            timestamp_ms: 1000,
        })
        .await
        .unwrap();
    index
        .record_cleanup(CleanupRecord {
            camera_id: "cam1".into(),
            deleted_segments: 5,
            freed_bytes: 500,
            cleanup_type: CleanupType::Emergency,
            timestamp_ms: 2000,
        })
        .await
        .unwrap();
    index.flush().await;

    let history = index.get_cleanup_history(Some("cam1"), 10);
    assert_eq!(history[0].timestamp_ms, 2000);
    assert_eq!(history[1].timestamp_ms, 1000);
}

#[tokio::test]
async fn recovery_log_mark_recovered_resolves_newest_unrecovered_entry() {
    let (index, _handle) = nvr_core::index::spawn(16);
    index
        .log_recovery_event("cam1", RecoveryErrorType::Timeout, "first")
        .await
        .unwrap();
    index
        .log_recovery_event("cam1", RecoveryErrorType::StreamDisconnect, "second")
        .await
        .unwrap();
    index.flush().await;

    index.mark_recovered("cam1").await.unwrap();
    index.flush().await;

    let log = index.get_recovery_log(Some("cam1"), 10);
    assert_eq!(log.len(), 2);
    assert!(log[0].recovered, "most recent entry is the one resolved");
    assert!(!log[1].recovered, "older entry stays unrecovered");
}

#[tokio::test]
async fn timeline_bucket_aggregates_by_camera_date_hour() {
    let (index, _handle) = nvr_core::index::spawn(16);
    let noon = chrono::NaiveDate::from_ymd_opt(2026, 7, 31)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis();

    index.insert_segment(seg("cam1", "a.mp4", noon, 3000, 1000)).await.unwrap();
    index.insert_segment(seg("cam1", "b.mp4", noon + 3000, 3000, 2000)).await.unwrap();
    index.flush().await;

    let date = chrono::NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
    let buckets = index.get_hourly_summary("cam1", date);
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].segment_count, 2);
    assert_eq!(buckets[0].total_size_bytes, 3000);
}
