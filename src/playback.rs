// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Playback Resolver (§4.G): validates a requested time range, looks up the
//! matching segments, synthesizes a VOD HLS playlist for them with
//! gap-derived durations, and serves individual segment files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::index::IndexStore;
use crate::model::Segment;

const MAX_RANGE_HOURS: i64 = 24;
const TARGET_DURATION_SECS: u32 = 4;

/// Combined response for a playback request (§4.G).
#[derive(Debug, Clone)]
pub struct PlaybackInfo {
    pub camera_id: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub segment_count: usize,
    pub total_duration_ms: i64,
    pub total_size_bytes: u64,
    pub segments: Vec<Segment>,
}

/// Rejects an inverted or oversized range. Future ranges are allowed since a
/// camera may be queried before its first segment for that window lands.
pub fn validate_time_range(start_time_ms: i64, end_time_ms: i64) -> Result<()> {
    if start_time_ms >= end_time_ms {
        return Err(CoreError::InvalidRange(
            "start_time must be before end_time".into(),
        ));
    }
    if end_time_ms - start_time_ms > MAX_RANGE_HOURS * 3_600_000 {
        let span_hours = (end_time_ms - start_time_ms) as f64 / 3_600_000.0;
        return Err(CoreError::InvalidRange(format!(
            "range spans {span_hours:.2}h, exceeding the {MAX_RANGE_HOURS}h limit"
        )));
    }
    Ok(())
}

/// Looks up segments and builds the combined playback response.
pub fn get_playback_info(
    index: &IndexStore,
    camera_id: &str,
    start_time_ms: i64,
    end_time_ms: i64,
) -> Result<PlaybackInfo> {
    validate_time_range(start_time_ms, end_time_ms)?;

    let segments = index.segments_in_range(camera_id, start_time_ms, end_time_ms);

    let total_duration_ms = match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => {
            (last.start_time_ms + last.duration_ms as i64) - first.start_time_ms
        }
        _ => 0,
    };
    let total_size_bytes = segments.iter().map(|s| s.file_size).sum();

    Ok(PlaybackInfo {
        camera_id: camera_id.to_string(),
        start_time_ms,
        end_time_ms,
        segment_count: segments.len(),
        total_duration_ms,
        total_size_bytes,
        segments,
    })
}

/// Builds a VOD HLS playlist over `segments` (already ordered ascending by
/// `start_time_ms`). Per-segment duration is derived from the gap to the
/// next segment's start, since wall-clock gaps between writes are the true
/// playback duration; the final segment falls back to its own nominal
/// `duration_ms` since there is no following segment to derive a gap from.
pub fn generate_playlist(segments: &[Segment], segment_url: impl Fn(&Segment) -> String) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-VERSION:3");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{TARGET_DURATION_SECS}");
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:0");
    let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD");

    for (i, seg) in segments.iter().enumerate() {
        let duration_secs = match segments.get(i + 1) {
            Some(next) => (next.start_time_ms - seg.start_time_ms) as f64 / 1000.0,
            None => seg.duration_ms as f64 / 1000.0,
        };
        let _ = writeln!(out, "#EXTINF:{duration_secs:.3},");
        let _ = writeln!(out, "{}", segment_url(seg));
    }

    let _ = writeln!(out, "#EXT-X-ENDLIST");
    out
}

/// Resolves the on-disk path for a segment identified by its URL-relative
/// path, rejecting any attempt to escape `base_path` via `..` components.
pub fn resolve_segment_path(base_path: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = base_path.join(relative);
    let canonical_base = base_path
        .canonicalize()
        .map_err(|e| CoreError::Storage(format!("cannot canonicalize base path: {e}")))?;
    let canonical = candidate
        .canonicalize()
        .map_err(|e| CoreError::Storage(format!("segment not found: {e}")))?;

    if !canonical.starts_with(&canonical_base) {
        return Err(CoreError::InvalidRange(
            "resolved path escapes storage root".into(),
        ));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn seg(camera: &str, start_ms: i64, duration_ms: u32) -> Segment {
        Segment::new(camera, "Cam", PathBuf::from("x.mp4"), start_ms, duration_ms, 1000)
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(validate_time_range(1000, 500).is_err());
    }

    #[test]
    fn rejects_oversized_range() {
        assert!(validate_time_range(0, 25 * 3_600_000).is_err());
    }

    #[test]
    fn accepts_future_range() {
        let far_future = chrono::Utc::now().timestamp_millis() + 86_400_000;
        assert!(validate_time_range(far_future, far_future + 1000).is_ok());
    }

    #[test]
    fn playlist_uses_gap_derived_duration_except_last() {
        let segments = vec![seg("cam1", 0, 3000), seg("cam1", 2500, 3000), seg("cam1", 6000, 3000)];
        let playlist = generate_playlist(&segments, |s| format!("seg-{}.mp4", s.start_time_ms));
        assert!(playlist.contains("#EXT-X-VERSION:3"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(playlist.contains("#EXTINF:2.500,"));
        assert!(playlist.contains("#EXTINF:3.500,"));
        assert!(playlist.contains("#EXTINF:3.000,"));
        assert!(playlist.trim_end().ends_with("#EXT-X-ENDLIST"));
    }
}
