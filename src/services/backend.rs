//! The storage backend capability the gateway talks to.
//!
//! Handlers never see a concrete client: they go through `ObjectBackend`,
//! which is constructed once at startup and shared behind an `Arc` by every
//! request-handling task.

use crate::models::file::{ObjectReference, PresignedUrlRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;

/// Forward-only byte stream, consumed exactly once.
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'a>>;

/// Lazy, pull-based sequence of listing entries.
pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = BackendResult<ObjectEntry>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend error: {0}")]
    Operation(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One entry produced by a recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// Directory/prefix marker rather than a real object.
    pub is_dir: bool,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        let is_dir = is_directory_marker(&key);
        Self { key, size, is_dir }
    }
}

/// A readable object handed back by `get_object`.
pub struct ObjectBody {
    pub content_length: Option<u64>,
    /// Content type recorded at upload, when the backend reports it.
    pub content_type: Option<String>,
    pub stream: ByteStream<'static>,
}

/// Operations the gateway needs from an S3-compatible store.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> BackendResult<bool>;

    async fn put_object(
        &self,
        object: &ObjectReference,
        content_type: &str,
        payload: ByteStream<'_>,
    ) -> BackendResult<()>;

    async fn get_object(&self, object: &ObjectReference) -> BackendResult<ObjectBody>;

    /// Recursive listing under `prefix`. Nothing is fetched until the
    /// stream is polled.
    fn list_objects(&self, bucket: &str, prefix: &str) -> EntryStream<'static>;

    async fn presign_get(&self, request: &PresignedUrlRequest) -> BackendResult<String>;

    /// Connectivity probe for health reporting.
    async fn ping(&self) -> BackendResult<()>;
}

pub fn is_directory_marker(key: &str) -> bool {
    key.ends_with('/')
}
