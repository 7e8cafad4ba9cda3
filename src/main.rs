use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, BackendKind};
use services::{
    backend::ObjectBackend, file_service::FileService, memory_backend::MemoryBackend,
    s3_backend::S3Backend,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting file-gateway with config: {:?}", cfg);

    // --- Storage backend, shared by every request ---
    let backend: Arc<dyn ObjectBackend> = match cfg.backend {
        BackendKind::S3 => Arc::new(
            S3Backend::new(&cfg.s3, cfg.backend_timeout).context("configuring S3 backend")?,
        ),
        BackendKind::Memory => {
            tracing::warn!("using the in-memory backend; data is lost on shutdown");
            let memory = MemoryBackend::new();
            for bucket in &cfg.memory_buckets {
                memory.create_bucket(bucket).await;
                tracing::info!("Created in-memory bucket {}", bucket);
            }
            Arc::new(memory)
        }
    };

    // --- Token validation ---
    let tokens = if cfg.auth.enabled {
        let validator = auth::TokenValidator::new(&cfg.auth.validation)
            .context("configuring bearer token validation")?;
        Some(Arc::new(validator))
    } else {
        tracing::warn!("bearer token authentication is DISABLED");
        None
    };

    let state = AppState {
        files: FileService::new(backend, cfg.presign_concurrency),
        tokens,
        max_upload_bytes: cfg.max_upload_bytes,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router, and with it the last handle on the backend, is gone here.
    tracing::info!("Server stopped; storage backend released");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
