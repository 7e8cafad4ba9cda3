//! In-memory `ObjectBackend` for local development and tests.
//!
//! Buckets and objects live in ordered maps behind a `tokio` lock, so
//! listings come back in key order like an S3 listing would.

use crate::{
    models::file::{ObjectReference, PresignedUrlRequest},
    services::backend::{
        BackendError, BackendResult, ByteStream, EntryStream, ObjectBackend, ObjectBody,
        ObjectEntry,
    },
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    content_type: String,
}

type Buckets = BTreeMap<String, BTreeMap<String, StoredBlob>>;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    buckets: Arc<RwLock<Buckets>>,
    failing_presigns: Arc<RwLock<HashSet<String>>>,
    presign_delays: Arc<RwLock<HashMap<String, Duration>>>,
    /// Listings fail after yielding this many entries.
    listing_fails_after: Arc<RwLock<Option<usize>>>,
    /// Downloads of these keys break after their first chunk.
    truncated_downloads: Arc<RwLock<HashSet<String>>>,
    puts: Arc<AtomicUsize>,
    issued: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bucket. Existing buckets are left untouched.
    pub async fn create_bucket(&self, bucket: &str) {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
    }

    /// Store an object directly, bypassing `put_object`. A key ending in
    /// `/` stores a directory marker.
    #[cfg(test)]
    pub async fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredBlob {
                    data: data.into(),
                    content_type: "application/octet-stream".into(),
                },
            );
    }

    /// Make every later presign of `key` fail.
    #[cfg(test)]
    pub async fn fail_presign_for(&self, key: &str) {
        self.failing_presigns.write().await.insert(key.to_string());
    }

    /// Hold presigns of `key` back for `delay`.
    #[cfg(test)]
    pub async fn delay_presign_for(&self, key: &str, delay: Duration) {
        self.presign_delays.write().await.insert(key.to_string(), delay);
    }

    /// Make every later listing fail once `entries` entries were yielded.
    #[cfg(test)]
    pub async fn fail_listing_after(&self, entries: usize) {
        *self.listing_fails_after.write().await = Some(entries);
    }

    /// Make downloads of `key` fail after the first chunk was sent.
    #[cfg(test)]
    pub async fn truncate_download_of(&self, key: &str) {
        self.truncated_downloads.write().await.insert(key.to_string());
    }

    /// Number of `put_object` calls that reached the backend.
    #[cfg(test)]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn bucket_exists(&self, bucket: &str) -> BackendResult<bool> {
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn put_object(
        &self,
        object: &ObjectReference,
        content_type: &str,
        payload: ByteStream<'_>,
    ) -> BackendResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if !self.bucket_exists(&object.bucket).await? {
            return Err(BackendError::NotFound(format!(
                "bucket `{}` does not exist",
                object.bucket
            )));
        }

        let data = payload
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|err| BackendError::Operation(format!("reading upload body: {}", err)))?
            .freeze();

        debug!(
            bucket = %object.bucket,
            key = %object.key,
            size = data.len(),
            "stored object in memory"
        );
        let mut buckets = self.buckets.write().await;
        let objects = buckets.get_mut(&object.bucket).ok_or_else(|| {
            BackendError::NotFound(format!("bucket `{}` does not exist", object.bucket))
        })?;
        objects.insert(
            object.key.clone(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, object: &ObjectReference) -> BackendResult<ObjectBody> {
        let buckets = self.buckets.read().await;
        let blob = buckets
            .get(&object.bucket)
            .and_then(|objects| objects.get(&object.key))
            .filter(|_| !object.key.ends_with('/'))
            .ok_or_else(|| {
                BackendError::NotFound(format!("{}/{}", object.bucket, object.key))
            })?;

        let data = blob.data.clone();
        let content_length = Some(data.len() as u64);
        let mut chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
            .collect();
        if self.truncated_downloads.read().await.contains(&object.key) {
            chunks.truncate(1);
            chunks.push(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "backend connection reset",
            )));
        }

        Ok(ObjectBody {
            content_length,
            content_type: Some(blob.content_type.clone()),
            stream: stream::iter(chunks).boxed(),
        })
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> EntryStream<'static> {
        let buckets = self.buckets.clone();
        let fails_after = self.listing_fails_after.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        // Snapshot on first poll so one listing sees one point in time.
        stream::once(async move {
            let buckets = buckets.read().await;
            let objects = buckets
                .get(&bucket)
                .ok_or_else(|| BackendError::NotFound(format!("bucket `{}`", bucket)))?;
            let mut entries: Vec<BackendResult<ObjectEntry>> = objects
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, blob)| Ok(ObjectEntry::new(key.clone(), blob.data.len() as u64)))
                .collect();
            if let Some(limit) = *fails_after.read().await {
                entries.truncate(limit);
                entries.push(Err(BackendError::NotFound(format!(
                    "bucket `{}` vanished while listing",
                    bucket
                ))));
            }
            Ok::<_, BackendError>(stream::iter(entries))
        })
        .try_flatten()
        .boxed()
    }

    async fn presign_get(&self, request: &PresignedUrlRequest) -> BackendResult<String> {
        let object = &request.object;
        if self.failing_presigns.read().await.contains(&object.key) {
            return Err(BackendError::Operation(format!(
                "presign rejected for `{}`",
                object.key
            )));
        }
        let delay = self.presign_delays.read().await.get(&object.key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let issued = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "memory://{}/{}?X-Expires={}&X-Issued={}",
            object.bucket, object.key, request.expiry_secs, issued
        ))
    }

    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }
}
