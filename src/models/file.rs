//! Request and response shapes for the file endpoints.

use crate::services::backend::ByteStream;
use serde::{Deserialize, Serialize};

/// Lifetime of every presigned download link, in seconds.
pub const PRESIGNED_URL_EXPIRY_SECS: u32 = 3600;

/// Identifies a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub bucket: String,
    pub key: String,
}

impl ObjectReference {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// One inbound upload. The payload is read once, front to back.
pub struct UploadRequest<'a> {
    pub object: ObjectReference,
    pub content_type: String,
    pub payload: ByteStream<'a>,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub object: ObjectReference,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrlRequest {
    pub object: ObjectReference,
    pub expiry_secs: u32,
}

/// A listed object and its time-limited download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    pub file_name: String,
    pub presigned_url: String,
}

/// Body of a successful upload response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_name: String,
    pub bucket_name: String,
}

impl From<StoredObject> for UploadResponse {
    fn from(stored: StoredObject) -> Self {
        Self {
            file_name: stored.object.key,
            bucket_name: stored.object.bucket,
        }
    }
}

/// Query string shared by the file endpoints. Both values are optional at
/// parse time so the handlers can report missing ones themselves.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub bucket_name: Option<String>,
    pub file_name: Option<String>,
}
