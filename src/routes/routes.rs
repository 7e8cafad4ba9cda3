//! Defines the HTTP surface of the gateway.
//!
//! ## Structure
//! - **Public endpoints**
//!   - `GET  /`         — welcome text
//!   - `GET  /health`   — storage backend connectivity
//!   - `GET  /healthz`  — liveness
//!
//! - **File endpoints** (bearer token required)
//!   - `POST /api/file/upload?bucketName=`             — multipart upload, field `file`
//!   - `GET  /api/file/download?bucketName=&fileName=` — streamed download
//!   - `GET  /api/file/files?bucketName=&fileName=`    — presigned links under a prefix

use crate::{
    auth::require_bearer,
    handlers::{
        file_handlers::{download_file, list_files, upload_file},
        health_handlers::{health, healthz, welcome},
    },
    state::AppState,
};
use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Build the router with `state` attached.
///
/// The bearer check is a route layer on the file endpoints only, so it runs
/// before any upload body is read.
pub fn routes(state: AppState) -> Router {
    let files = Router::new()
        .route(
            "/api/file/upload",
            post(upload_file).layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route("/api/file/download", get(download_file))
        .route("/api/file/files", get(list_files))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/healthz", get(healthz))
        .merge(files)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    id = %Uuid::new_v4(),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{TokenValidator, tests as tokens},
        models::file::FileDetails,
        services::{file_service::FileService, memory_backend::MemoryBackend},
    };
    use axum::{
        body::to_bytes,
        http::{StatusCode, header},
        response::Response,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "gateway-test-boundary";

    fn app(backend: &MemoryBackend, secured: bool) -> Router {
        let validator =
            secured.then(|| Arc::new(TokenValidator::new(&tokens::settings()).unwrap()));
        routes(AppState {
            files: FileService::new(Arc::new(backend.clone()), 4),
            tokens: validator,
            max_upload_bytes: 1024 * 1024,
        })
    }

    fn multipart(field: &str, file_name: Option<&str>, content: &str) -> Body {
        let disposition = match file_name {
            Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
            None => format!("form-data; name=\"{}\"", field),
        };
        Body::from(format!(
            "--{b}\r\nContent-Disposition: {d}\r\nContent-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            d = disposition,
            c = content
        ))
    }

    fn upload(uri: &str, body: Body) -> Request<Body> {
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn docs_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.insert("docs", "a.txt", "alpha").await;
        backend.insert("docs", "reports/", "").await;
        backend.insert("docs", "reports/b.pdf", "%PDF").await;
        backend
    }

    #[tokio::test]
    async fn upload_then_download_over_http() {
        let backend = MemoryBackend::new();
        backend.create_bucket("docs").await;
        let app = app(&backend, false);

        let response = app
            .clone()
            .oneshot(upload(
                "/api/file/upload?bucketName=docs",
                multipart("file", Some("hello.txt"), "hello gateway"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "fileName": "hello.txt", "bucketName": "docs" })
        );

        let response = app
            .oneshot(get_req("/api/file/download?bucketName=docs&fileName=hello.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"hello.txt\""
        );
        assert_eq!(body_bytes(response).await, b"hello gateway");
    }

    #[tokio::test]
    async fn upload_without_file_is_bad_request() {
        let backend = MemoryBackend::new();
        backend.create_bucket("docs").await;
        let app = app(&backend, false);

        let cases = [
            multipart("other", Some("a.txt"), "data"),
            multipart("file", Some("empty.txt"), ""),
            multipart("file", None, "data"),
        ];
        for body in cases {
            let response = app
                .clone()
                .oneshot(upload("/api/file/upload?bucketName=docs", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let response = app
            .oneshot(upload(
                "/api/file/upload",
                multipart("file", Some("a.txt"), "data"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(backend.put_count(), 0);
    }

    #[tokio::test]
    async fn download_of_missing_key_is_not_found() {
        let backend = docs_backend().await;
        let response = app(&backend, false)
            .oneshot(get_req("/api/file/download?bucketName=docs&fileName=nope.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn listing_matches_the_docs_scenario() {
        let backend = docs_backend().await;
        let app = app(&backend, false);

        let response = app
            .clone()
            .oneshot(get_req("/api/file/files?bucketName=docs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let files: Vec<FileDetails> =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "reports/b.pdf"]);

        let response = app
            .oneshot(get_req("/api/file/files?bucketName=docs&fileName=reports"))
            .await
            .unwrap();
        let files = body_json(response).await;
        assert_eq!(files.as_array().map(Vec::len), Some(1));
        assert_eq!(files[0]["fileName"], "reports/b.pdf");
        assert!(!files[0]["presignedUrl"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_status_codes() {
        let backend = docs_backend().await;
        backend.create_bucket("empty").await;
        let app = app(&backend, false);

        for (uri, status) in [
            ("/api/file/files", StatusCode::BAD_REQUEST),
            ("/api/file/files?bucketName=ghost", StatusCode::NOT_FOUND),
            ("/api/file/files?bucketName=empty", StatusCode::NOT_FOUND),
            ("/api/file/files?bucketName=docs&fileName=zzz", StatusCode::NOT_FOUND),
        ] {
            let response = app.clone().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(response.status(), status, "{}", uri);
        }
    }

    #[tokio::test]
    async fn presign_failure_fails_the_whole_listing() {
        let backend = docs_backend().await;
        backend.fail_presign_for("a.txt").await;
        let response = app(&backend, false)
            .oneshot(get_req("/api/file/files?bucketName=docs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn enumeration_failure_is_a_server_error() {
        let backend = docs_backend().await;
        backend.fail_listing_after(1).await;
        let response = app(&backend, false)
            .oneshot(get_req("/api/file/files?bucketName=docs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn broken_download_stream_errors_the_body() {
        let backend = MemoryBackend::new();
        backend.insert("bin", "blob", vec![1u8; 64 * 1024 + 5]).await;
        backend.truncate_download_of("blob").await;

        let response = app(&backend, false)
            .oneshot(get_req("/api/file/download?bucketName=bin&fileName=blob"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn file_routes_require_a_valid_token() {
        let backend = docs_backend().await;
        let app = app(&backend, true);

        let response = app
            .clone()
            .oneshot(get_req("/api/file/files?bucketName=docs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong_scope = tokens::token(
            json!({ "iss": tokens::ISSUER, "scp": "files.none", "exp": u64::MAX / 2 }),
            tokens::SECRET,
        );
        let response = app
            .clone()
            .oneshot(
                Request::get("/api/file/files?bucketName=docs")
                    .header(header::AUTHORIZATION, format!("Bearer {}", wrong_scope))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                Request::get("/api/file/files?bucketName=docs")
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {}", tokens::valid_token()),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn public_routes_skip_auth() {
        let backend = MemoryBackend::new();
        let app = app(&backend, true);

        let response = app.clone().oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_req("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "UP" }));
    }
}
