//! FileService: upload, download and listing-with-presigned-URLs on top of
//! an injected `ObjectBackend`.
//!
//! Nothing here holds mutable state: every call works on its own streams and
//! futures, so concurrent requests cannot observe each other. Dropping a
//! returned future (client went away) drops every backend call it started.

use crate::{
    models::file::{
        FileDetails, ObjectReference, PRESIGNED_URL_EXPIRY_SECS, PresignedUrlRequest,
        StoredObject, UploadRequest,
    },
    services::backend::{BackendError, ByteStream, ObjectBackend, ObjectBody, ObjectEntry},
};
use futures::{StreamExt, TryStreamExt, future, stream};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering},
};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Default number of presign calls kept in flight for one listing.
pub const DEFAULT_PRESIGN_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum FileServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("file `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("no files found")]
    NoFilesFound,
    #[error("failed to presign `{key}`: {source}")]
    Presign {
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("listing failed: {0}")]
    Listing(#[source] BackendError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type FileServiceResult<T> = Result<T, FileServiceError>;

#[derive(Clone)]
pub struct FileService {
    backend: Arc<dyn ObjectBackend>,
    presign_expiry_secs: u32,
    presign_concurrency: usize,
}

impl FileService {
    pub fn new(backend: Arc<dyn ObjectBackend>, presign_concurrency: usize) -> Self {
        Self {
            backend,
            presign_expiry_secs: PRESIGNED_URL_EXPIRY_SECS,
            presign_concurrency: presign_concurrency.max(1),
        }
    }

    /// Stream an upload into the backend.
    ///
    /// The first non-empty chunk is read before the backend is contacted, so
    /// an empty payload is rejected without any backend call. The peeked
    /// chunk is then put back in front of the remaining stream. If reading
    /// the payload fails midway, the upload is reported as a bad request
    /// whatever error the backend surfaced for it.
    pub async fn upload(&self, request: UploadRequest<'_>) -> FileServiceResult<StoredObject> {
        let UploadRequest {
            object,
            content_type,
            mut payload,
        } = request;
        require("bucketName", &object.bucket)?;
        require("fileName", &object.key)?;

        let first = loop {
            match payload.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(err)) => {
                    return Err(FileServiceError::Validation(format!(
                        "could not read file: {}",
                        err
                    )));
                }
                None => return Err(FileServiceError::Validation("file is empty".into())),
            }
        };

        let written = Arc::new(AtomicU64::new(0));
        let counter = written.clone();
        let read_error = Arc::new(OnceLock::new());
        let failed = read_error.clone();
        let body: ByteStream<'_> = stream::once(future::ready(Ok(first)))
            .chain(payload)
            .inspect_ok(move |chunk| {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            })
            .inspect_err(move |err| {
                let _ = failed.set(err.to_string());
            })
            .boxed();

        self.backend
            .put_object(&object, &content_type, body)
            .await
            .map_err(|err| match (read_error.get(), err) {
                (Some(detail), err) => {
                    debug!(error = %err, "backend rejected a broken upload body");
                    FileServiceError::Validation(format!("could not read file: {}", detail))
                }
                (None, BackendError::NotFound(_)) => {
                    FileServiceError::BucketNotFound(object.bucket.clone())
                }
                (None, other) => FileServiceError::Backend(other),
            })?;

        let size_bytes = written.load(Ordering::Relaxed);
        info!(bucket = %object.bucket, key = %object.key, size_bytes, "file uploaded");
        Ok(StoredObject { object, size_bytes })
    }

    /// Open an object for streaming back to the caller.
    ///
    /// A missing bucket or key is reported here, before any body byte exists.
    pub async fn download(&self, object: &ObjectReference) -> FileServiceResult<ObjectBody> {
        require("bucketName", &object.bucket)?;
        require("fileName", &object.key)?;

        let body = self
            .backend
            .get_object(object)
            .await
            .map_err(|err| match err {
                BackendError::NotFound(_) => FileServiceError::ObjectNotFound {
                    bucket: object.bucket.clone(),
                    key: object.key.clone(),
                },
                other => FileServiceError::Backend(other),
            })?;
        debug!(bucket = %object.bucket, key = %object.key, "download stream opened");
        Ok(body)
    }

    /// List every non-directory object under `prefix` and mint a download
    /// link for each.
    ///
    /// Presigns run `presign_concurrency` at a time. Results keep listing
    /// order, and the first failure aborts the whole listing.
    pub async fn list_files(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> FileServiceResult<Vec<FileDetails>> {
        require("bucketName", bucket)?;
        if !self.backend.bucket_exists(bucket).await? {
            return Err(FileServiceError::BucketNotFound(bucket.to_string()));
        }

        let prefix = prefix.unwrap_or_default();
        let files: Vec<FileDetails> = self
            .backend
            .list_objects(bucket, prefix)
            .map_err(FileServiceError::Listing)
            .try_filter(|entry| future::ready(!entry.is_dir))
            .map_ok(|entry| self.presign_entry(bucket, entry))
            .try_buffered(self.presign_concurrency)
            .try_collect()
            .await?;

        if files.is_empty() {
            return Err(FileServiceError::NoFilesFound);
        }
        debug!(bucket, prefix, count = files.len(), "listed files");
        Ok(files)
    }

    async fn presign_entry(
        &self,
        bucket: &str,
        entry: ObjectEntry,
    ) -> FileServiceResult<FileDetails> {
        trace!(key = %entry.key, size = entry.size, "presigning");
        let request = PresignedUrlRequest {
            object: ObjectReference::new(bucket, entry.key),
            expiry_secs: self.presign_expiry_secs,
        };
        match self.backend.presign_get(&request).await {
            Ok(presigned_url) => Ok(FileDetails {
                file_name: request.object.key,
                presigned_url,
            }),
            Err(source) => Err(FileServiceError::Presign {
                key: request.object.key,
                source,
            }),
        }
    }

    /// Connectivity probe used by the health endpoint.
    pub async fn check_backend(&self) -> FileServiceResult<()> {
        Ok(self.backend.ping().await?)
    }
}

fn require(name: &str, value: &str) -> FileServiceResult<()> {
    if value.trim().is_empty() {
        return Err(FileServiceError::Validation(format!("{} is required", name)));
    }
    Ok(())
}
