//! `ObjectBackend` over an S3-compatible store (AWS S3, MinIO, ...) using
//! the `rust-s3` client.
//!
//! One `S3Backend` is built at startup and shared read-only by every request.
//! Bucket handles are cheap descriptors and are created per call because the
//! bucket name is supplied by the caller.

use crate::{
    config::S3Settings,
    models::file::{ObjectReference, PresignedUrlRequest},
    services::backend::{
        BackendError, BackendResult, ByteStream, EntryStream, ObjectBackend, ObjectBody,
        ObjectEntry,
    },
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use s3::{Bucket, Region, creds::Credentials, error::S3Error, serde_types::ListBucketResult};
use std::{future::Future, io, time::Duration};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};

/// Keys requested per listing page.
const LIST_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct S3Backend {
    region: Region,
    credentials: Credentials,
    path_style: bool,
    timeout: Duration,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build the client from settings. No network traffic happens here.
    pub fn new(settings: &S3Settings, timeout: Duration) -> BackendResult<Self> {
        let region = Region::Custom {
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
        };
        let credentials = Credentials::new(
            settings.access_key.as_deref(),
            settings.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|err| BackendError::Operation(format!("invalid S3 credentials: {}", err)))?;

        Ok(Self {
            region,
            credentials,
            path_style: settings.path_style,
            timeout,
        })
    }

    fn bucket(&self, name: &str) -> BackendResult<Bucket> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }

    /// Run one backend round-trip under the configured timeout.
    async fn call<T, F>(&self, op: &str, fut: F) -> BackendResult<T>
    where
        F: Future<Output = Result<T, S3Error>>,
    {
        bounded(self.timeout, op, fut).await
    }
}

async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> BackendResult<T>
where
    F: Future<Output = Result<T, S3Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(BackendError::from),
        Err(_) => Err(BackendError::Unavailable(format!(
            "{} timed out after {:?}",
            op, timeout
        ))),
    }
}

impl From<S3Error> for BackendError {
    fn from(err: S3Error) -> Self {
        match err {
            S3Error::HttpFailWithBody(404, body) => BackendError::NotFound(body),
            S3Error::HttpFailWithBody(status, body) => {
                BackendError::Operation(format!("backend returned {}: {}", status, body))
            }
            other => BackendError::Unavailable(other.to_string()),
        }
    }
}

/// One listing page and the token for the page after it.
#[derive(Debug, Default)]
struct Page {
    entries: Vec<ObjectEntry>,
    next_token: Option<String>,
}

impl From<ListBucketResult> for Page {
    fn from(page: ListBucketResult) -> Self {
        Self {
            next_token: continuation(page.is_truncated, page.next_continuation_token),
            entries: page
                .contents
                .into_iter()
                .map(|object| ObjectEntry::new(object.key, object.size))
                .collect(),
        }
    }
}

/// A page only has a successor when it is truncated and carries a token.
fn continuation(is_truncated: bool, token: Option<String>) -> Option<String> {
    token.filter(|token| is_truncated && !token.is_empty())
}

/// Flatten pages fetched one at a time into a single entry stream.
///
/// `fetch` gets the continuation token (`None` for the first page). Nothing
/// is fetched until the stream is polled, and the first failed page ends it.
fn paged<F, Fut>(fetch: F) -> EntryStream<'static>
where
    F: Fn(Option<String>) -> Fut + Send + 'static,
    Fut: Future<Output = BackendResult<Page>> + Send + 'static,
{
    // `None` once the last page has been read, otherwise the token to ask
    // for (`Some(None)` for the first page).
    stream::try_unfold(Some(None::<String>), move |state| {
        let request = state.map(|token| fetch(token));
        async move {
            let Some(request) = request else {
                return Ok::<_, BackendError>(None);
            };
            let page = request.await?;
            let next = page.next_token.map(Some);
            let entries = page.entries.into_iter().map(Ok::<_, BackendError>);
            Ok(Some((stream::iter(entries), next)))
        }
    })
    .try_flatten()
    .boxed()
}

#[async_trait]
impl ObjectBackend for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn bucket_exists(&self, bucket: &str) -> BackendResult<bool> {
        let handle = self.bucket(bucket)?;
        let probe = handle.list_page(String::new(), None, None, None, Some(1));
        match self.call("bucket probe", probe).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, payload), fields(backend = "s3", bucket = %object.bucket, key = %object.key))]
    async fn put_object(
        &self,
        object: &ObjectReference,
        content_type: &str,
        payload: ByteStream<'_>,
    ) -> BackendResult<()> {
        let handle = self.bucket(&object.bucket)?;
        let mut reader = StreamReader::new(payload);
        // Multipart upload under the hood, so the total length is not needed.
        handle
            .put_object_stream_with_content_type(&mut reader, &object.key, content_type)
            .await?;
        debug!("upload stream finished");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %object.bucket, key = %object.key))]
    async fn get_object(&self, object: &ObjectReference) -> BackendResult<ObjectBody> {
        let handle = self.bucket(&object.bucket)?;
        let response = self
            .call("get object", handle.get_object_stream(&object.key))
            .await?;

        let stream = response
            .bytes
            .map_err(|err| io::Error::other(err.to_string()))
            .boxed();

        Ok(ObjectBody {
            content_length: None,
            content_type: None,
            stream,
        })
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> EntryStream<'static> {
        let handle = match self.bucket(bucket) {
            Ok(handle) => handle,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        let prefix = prefix.to_string();
        let timeout = self.timeout;

        paged(move |token| {
            let handle = handle.clone();
            let prefix = prefix.clone();
            async move {
                let (page, _) = bounded(
                    timeout,
                    "list objects",
                    handle.list_page(prefix, None, token, None, Some(LIST_PAGE_SIZE)),
                )
                .await?;
                Ok::<_, BackendError>(Page::from(page))
            }
        })
    }

    #[instrument(skip(self, request), fields(backend = "s3", key = %request.object.key))]
    async fn presign_get(&self, request: &PresignedUrlRequest) -> BackendResult<String> {
        let handle = self.bucket(&request.object.bucket)?;
        self.call(
            "presign",
            handle.presign_get(&request.object.key, request.expiry_secs, None),
        )
        .await
    }

    async fn ping(&self) -> BackendResult<()> {
        let listing = Bucket::list_buckets(self.region.clone(), self.credentials.clone());
        self.call("list buckets", listing).await.map(|_| ())
    }
}
