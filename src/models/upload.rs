//! Represents files offered for upload and the outcome of an upload batch.

use crate::models::image::ImageRecord;
use bytes::Bytes;
use serde::Serialize;

/// A file picked by the user, before validation.
#[derive(Clone, Debug)]
pub struct CandidateFile {
    /// Original file name as reported by the client.
    pub name: String,

    /// Declared media type (e.g. `image/png`).
    pub media_type: String,

    /// File contents.
    pub bytes: Bytes,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Upload session state for one user.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Idle,
    Uploading,
}

/// Outcome of `UploadPipeline::submit`.
#[derive(Serialize, Clone, Debug)]
pub struct UploadReport {
    /// Records written, in upload order.
    pub uploaded: Vec<ImageRecord>,

    /// Candidates dropped by validation.
    pub rejected: usize,
}
