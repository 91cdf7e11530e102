// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("camera '{id}' not found")]
    CameraNotFound { id: String },

    #[error("invalid playback range: {0}")]
    InvalidRange(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Index Store errors (§4.A). Kept separate from `CoreError` so the writer
/// task can classify constraint violations without depending on the whole
/// error surface.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("duplicate segment: camera={camera_id} start_time_ms={start_time_ms}")]
    DuplicateSegment { camera_id: String, start_time_ms: i64 },

    #[error("duplicate file path: {0}")]
    DuplicateFilePath(PathBuf),

    #[error("segment not found: {0}")]
    NotFound(PathBuf),

    #[error("writer queue closed")]
    WriterClosed,
}

/// Tagged classification of Segment Writer failures (§4.C, redesign notes in §9).
///
/// Replaces the source's polymorphic exception-type dispatch: the writer
/// constructs one of these per failure and the Recovery Tracker discriminates
/// on the variant rather than on an exception class hierarchy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IngestError {
    #[error("network timeout")]
    NetworkTimeout,
    #[error("stream disconnected")]
    StreamDisconnect,
    #[error("write failure")]
    WriteFailure,
    #[error("unknown ingest error")]
    Unknown,
}

impl IngestError {
    /// Per-class backoff before the writer re-enters the poll loop (§4.C).
    pub fn backoff(self) -> std::time::Duration {
        match self {
            IngestError::WriteFailure => std::time::Duration::from_secs(1),
            IngestError::NetworkTimeout => std::time::Duration::from_secs(2),
            IngestError::StreamDisconnect => std::time::Duration::from_secs(3),
            IngestError::Unknown => std::time::Duration::from_secs(1),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            IngestError::NetworkTimeout
        } else if err.is_connect() {
            IngestError::StreamDisconnect
        } else {
            IngestError::Unknown
        }
    }
}

impl From<IngestError> for crate::model::RecoveryErrorType {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::NetworkTimeout => crate::model::RecoveryErrorType::Timeout,
            IngestError::StreamDisconnect => crate::model::RecoveryErrorType::StreamDisconnect,
            IngestError::WriteFailure => crate::model::RecoveryErrorType::WriteFailure,
            IngestError::Unknown => crate::model::RecoveryErrorType::Unknown,
        }
    }
}
