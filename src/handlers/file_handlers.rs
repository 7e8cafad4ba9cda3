//! HTTP handlers for the file endpoints.
//! Upload and download bodies are streamed straight between the client and
//! the backend; nothing is buffered whole in memory.

use crate::{
    auth::Principal,
    errors::AppError,
    models::file::{FileDetails, FileQuery, ObjectReference, UploadRequest, UploadResponse},
    state::AppState,
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use std::io;
use tracing::debug;

/// Multipart field that carries the upload.
const FILE_FIELD: &str = "file";

/// `POST /api/file/upload?bucketName=` with multipart field `file`.
pub async fn upload_file(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Query(q): Query<FileQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let bucket = required(q.bucket_name, "bucketName")?;
    if let Some(Extension(principal)) = &principal {
        debug!(subject = ?principal.subject, scopes = ?principal.scopes, "upload requested");
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "skipping multipart field");
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("file name is required"))?;
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let payload = field.map_err(|err| io::Error::other(err.body_text()));
        let request = UploadRequest {
            object: ObjectReference::new(bucket, file_name),
            content_type,
            payload: Box::pin(payload),
        };

        let stored = state.files.upload(request).await?;
        return Ok(Json(stored.into()));
    }

    Err(AppError::bad_request("file is required"))
}

/// `GET /api/file/download?bucketName=&fileName=` as a streaming response.
pub async fn download_file(
    State(state): State<AppState>,
    Query(q): Query<FileQuery>,
) -> Result<Response, AppError> {
    let bucket = required(q.bucket_name, "bucketName")?;
    let key = required(q.file_name, "fileName")?;
    let object = ObjectReference::new(bucket, key);

    let body = state.files.download(&object).await?;
    debug!(stored_type = ?body.content_type, "sending file as octet-stream");

    let mut response = Response::new(Body::from_stream(body.stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&object.key)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = body.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    Ok(response)
}

/// `GET /api/file/files?bucketName=&fileName=`: presigned links for every
/// file under the optional `fileName` prefix.
pub async fn list_files(
    State(state): State<AppState>,
    Query(q): Query<FileQuery>,
) -> Result<Json<Vec<FileDetails>>, AppError> {
    let bucket = required(q.bucket_name, "bucketName")?;
    let prefix = q.file_name.filter(|prefix| !prefix.is_empty());

    let files = state.files.list_files(&bucket, prefix.as_deref()).await?;
    Ok(Json(files))
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::bad_request(format!("{} is required", name)))
}

/// `attachment; filename="..."`, with quotes and backslashes escaped and
/// control characters dropped.
fn content_disposition(file_name: &str) -> String {
    let escaped: String = file_name
        .chars()
        .filter(|c| !c.is_control())
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            other => vec![other],
        })
        .collect();
    format!("attachment; filename=\"{}\"", escaped)
}
