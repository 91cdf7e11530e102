// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HLS playlist parsing primitives consumed by the Segment Writer (§4.C).
//!
//! The media gateway's playlists are plain text manifests; no crate in the
//! dependency stack parses M3U8, so these are hand-rolled line scans mirroring
//! the manual string parsing the source implementation used.

use url::Url;

/// Resolves the media playlist URL from a fetched playlist body.
///
/// If `body` is a master playlist (contains `#EXT-X-STREAM-INF`), returns the
/// first non-comment, non-blank line resolved against `base`. Otherwise the
/// playlist already IS the media playlist and `base` is returned unchanged.
pub fn resolve_media_playlist_url(base: &Url, body: &str) -> Result<Url, url::ParseError> {
    if !body.contains("#EXT-X-STREAM-INF") {
        return Ok(base.clone());
    }
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return base.join(line);
    }
    Ok(base.clone())
}

/// Extracts the `URI="..."` value from a `#EXT-X-MAP:` line, if present.
pub fn extract_init_segment_uri(media_playlist: &str) -> Option<&str> {
    for line in media_playlist.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#EXT-X-MAP:") {
            if let Some(start) = rest.find("URI=\"") {
                let after = &rest[start + 5..];
                if let Some(end) = after.find('"') {
                    return Some(&after[..end]);
                }
            }
        }
    }
    None
}

/// Parsed media playlist: the media-sequence number and the segment URIs in
/// playlist order, already filtered to the writer's contract (§4.C step 3):
/// URIs containing `_seg` and not containing `_part` or `_init`.
pub struct MediaPlaylist {
    pub media_sequence: u64,
    pub segment_uris: Vec<String>,
}

pub fn parse_media_playlist(body: &str) -> MediaPlaylist {
    let mut media_sequence = 0u64;
    let mut segment_uris = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = rest.trim().parse().unwrap_or(0);
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.contains("_seg") && !line.contains("_part") && !line.contains("_init") {
            segment_uris.push(line.to_string());
        }
    }

    MediaPlaylist {
        media_sequence,
        segment_uris,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_master_playlist_variant() {
        let base = Url::parse("http://gateway/cam1/index.m3u8").unwrap();
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nstream.m3u8\n";
        let resolved = resolve_media_playlist_url(&base, body).unwrap();
        assert_eq!(resolved.as_str(), "http://gateway/cam1/stream.m3u8");
    }

    #[test]
    fn passthrough_when_already_media_playlist() {
        let base = Url::parse("http://gateway/cam1/stream.m3u8").unwrap();
        let body = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:5\n#EXTINF:3.0,\nseg5_seg.mp4\n";
        let resolved = resolve_media_playlist_url(&base, body).unwrap();
        assert_eq!(resolved, base);
    }

    #[test]
    fn extracts_init_segment_uri() {
        let body = "#EXTM3U\n#EXT-X-MAP:URI=\"init_init.mp4\"\n#EXTINF:3.0,\nseg0_seg.mp4\n";
        assert_eq!(extract_init_segment_uri(body), Some("init_init.mp4"));
    }

    #[test]
    fn filters_part_and_init_uris() {
        let body = concat!(
            "#EXTM3U\n",
            "#EXT-X-MEDIA-SEQUENCE:12\n",
            "#EXT-X-MAP:URI=\"stream_init.mp4\"\n",
            "#EXTINF:3.0,\n",
            "stream_seg12.mp4\n",
            "#EXTINF:0.5,\n",
            "stream_part12.mp4\n",
        );
        let parsed = parse_media_playlist(body);
        assert_eq!(parsed.media_sequence, 12);
        assert_eq!(parsed.segment_uris, vec!["stream_seg12.mp4".to_string()]);
    }
}
