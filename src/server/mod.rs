// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API server
//!
//! Accepts a list of file links and answers with a single ZIP archive.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /download-zip` - Fetch `{"urls": [...]}` and return `files.zip`
//!
//! # Example
//!
//! ```no_run
//! use linkbundle::config::Config;
//! use linkbundle::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = Server::new(Config::default());
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
    GovernorLayer,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{AuditStore, JsonlAuditStore};
use crate::config::Config;
use crate::errors::{ApiError, ApiResult};
use crate::pipeline::Pipeline;
use crate::policy::UrlPolicy;
use crate::types::PipelineOutcome;
use crate::workspace::Workspace;

// Maximum request body size (1MB)
const MAX_BODY_SIZE: usize = 1024 * 1024;
// Read size when streaming the archive back
const STREAM_CHUNK_SIZE: usize = 64 * 1024;
/// Name the client sees for the downloaded archive.
pub const DOWNLOAD_FILE_NAME: &str = "files.zip";

const X_FILES_ATTEMPTED: HeaderName = HeaderName::from_static("x-files-attempted");
const X_FILES_SUCCEEDED: HeaderName = HeaderName::from_static("x-files-succeeded");

/// Server state shared across handlers.
pub struct AppState {
    pub config: Config,
    pub pipeline: Pipeline,
    pub policy: UrlPolicy,
    pub audit: Arc<dyn AuditStore>,
}

/// API server.
pub struct Server {
    config: Config,
    audit: Option<Arc<dyn AuditStore>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            audit: None,
        }
    }

    /// Use `store` instead of the file-backed audit log from the config.
    pub fn with_audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the port.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Result<Router> {
        let audit: Arc<dyn AuditStore> = match &self.audit {
            Some(store) => Arc::clone(store),
            None => Arc::new(
                JsonlAuditStore::new(self.config.audit_log_path(), self.config.audit_enabled)
                    .context("Failed to open audit log")?,
            ),
        };

        let state = Arc::new(AppState {
            config: self.config.clone(),
            pipeline: Pipeline::from_config(&self.config)
                .context("Failed to build HTTP client")?,
            policy: UrlPolicy::from_config(&self.config),
            audit,
        });

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/download-zip", post(download_zip_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

        if let Some(limit) = self.config.rate_limit {
            let governor_conf = Arc::new(
                GovernorConfigBuilder::default()
                    .per_second(limit.per_second)
                    .burst_size(limit.burst)
                    .key_extractor(SmartIpKeyExtractor)
                    .finish()
                    .ok_or_else(|| anyhow!("Invalid rate limit configuration: {:?}", limit))?,
            );
            router = router.layer(GovernorLayer {
                config: governor_conf,
            });
        }

        Ok(router
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(self.cors_layer()?),
            )
            .with_state(state))
    }

    fn cors_layer(&self) -> Result<CorsLayer> {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE])
            .expose_headers([CONTENT_DISPOSITION, X_FILES_ATTEMPTED, X_FILES_SUCCEEDED]);

        if self.config.allowed_origins.is_empty() {
            return Ok(cors.allow_origin(Any));
        }

        let origins = self
            .config
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("Invalid allowed origin: {}", origin))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(cors.allow_origin(AllowOrigin::list(origins)))
    }

    /// Start the server with graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);

        tracing::info!("Starting server on {}", addr);

        // Security warning if binding to all interfaces
        if self.config.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the API to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow!(
                    "Port {} is already in use. \
                    Stop the other process or pick another port with: linkbundle serve --port <PORT>",
                    self.config.port
                )
            } else {
                anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` completes.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router()?;

        // Peer addresses feed the per-IP rate limiter.
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Download handler.
///
/// Validation and auditing happen before a workspace exists; from then on
/// the workspace is owned by this call until it is handed to the response
/// body, and dropping it on any error path removes it.
async fn download_zip_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body
        .map_err(|e| ApiError::invalid_request(format!("Invalid request: {}", e.body_text())))?;
    let request = state.policy.validate(&body).map_err(ApiError::invalid_request)?;

    let audit = Arc::clone(&state.audit);
    let urls = request.urls.clone();
    tokio::task::spawn_blocking(move || audit.record(&urls))
        .await
        .map_err(|e| ApiError::internal(&format!("audit task failed: {}", e)))?
        .map_err(|e| ApiError::audit_failed(&e))?;

    let workspace = Workspace::create(state.config.scratch_root())
        .map_err(|e| ApiError::internal(&format!("failed to create workspace: {}", e)))?;

    tracing::info!(
        request_id = %workspace.request_id(),
        urls = request.urls.len(),
        "Processing download request"
    );

    let outcome = state.pipeline.run(&request.urls, &workspace).await?;
    deliver(outcome, workspace).await
}

/// Build the streaming archive response. The workspace travels with the body
/// and is released once the body is finished or dropped.
async fn deliver(outcome: PipelineOutcome, workspace: Workspace) -> ApiResult<Response> {
    let Some(path) = outcome.archive_path.as_ref() else {
        return Err(ApiError::all_downloads_failed(outcome.attempted));
    };

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ApiError::internal(&format!("failed to open archive: {}", e)))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(&format!("failed to stat archive: {}", e)))?
        .len();

    if outcome.is_partial() {
        tracing::warn!(
            request_id = %workspace.request_id(),
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            "Delivering partial archive"
        );
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/zip")
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", DOWNLOAD_FILE_NAME),
        )
        .header(CONTENT_LENGTH, len)
        .header(X_FILES_ATTEMPTED, outcome.attempted)
        .header(X_FILES_SUCCEEDED, outcome.succeeded)
        .body(Body::from_stream(archive_stream(file, workspace)))
        .map_err(|e| ApiError::internal(&format!("failed to build response: {}", e)))
}

/// Stream `file` in chunks, then release `workspace`.
fn archive_stream(
    file: tokio::fs::File,
    workspace: Workspace,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    stream::unfold(Some((file, workspace)), |state| async move {
        let (mut file, workspace) = state?;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => {
                drop(file);
                match tokio::task::spawn_blocking(move || workspace.release()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Failed to remove workspace after delivery")
                    }
                    Err(e) => tracing::warn!(error = %e, "Workspace cleanup task failed"),
                }
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some((file, workspace))))
            }
            // Dropping the workspace here removes it.
            Err(e) => Some((Err(e), None)),
        }
    })
}

// =============================================================================
// Utilities
// =============================================================================

/// Graceful shutdown signal handler.
///
/// Waits for SIGINT/SIGTERM (Ctrl+C on non-Unix platforms).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!("Failed to install signal handlers: {}", e);
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            return std::future::pending().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditStore;

    fn test_config() -> Config {
        Config {
            audit_enabled: false,
            rate_limit: None,
            ..Config::default()
        }
    }

    #[test]
    fn test_server_creation() {
        let server = Server::new(Config {
            port: 3000,
            ..Config::default()
        });
        assert_eq!(server.port(), 3000);
    }

    #[test]
    fn test_server_default() {
        let server = Server::default();
        assert_eq!(server.port(), 5000);
    }

    #[tokio::test]
    async fn test_router_builds_with_rate_limit() {
        let server = Server::new(Config {
            audit_enabled: false,
            ..Config::default()
        })
        .with_audit_store(Arc::new(MemoryAuditStore::new()));
        assert!(server.build_router().is_ok());
    }

    #[tokio::test]
    async fn test_router_rejects_bad_origin() {
        let server = Server::new(Config {
            allowed_origins: vec!["bad\norigin".to_string()],
            ..test_config()
        })
        .with_audit_store(Arc::new(MemoryAuditStore::new()));
        assert!(server.build_router().is_err());
    }

    #[tokio::test]
    async fn test_archive_stream_releases_workspace() {
        use futures_util::StreamExt;

        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path()).unwrap();
        let dir = workspace.path().to_path_buf();
        let payload = vec![7u8; STREAM_CHUNK_SIZE + 10];
        std::fs::write(workspace.archive_path(), &payload).unwrap();

        let file = tokio::fs::File::open(workspace.archive_path()).await.unwrap();
        let chunks: Vec<Bytes> = archive_stream(file, workspace)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), payload.len());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_workspace() {
        use futures_util::StreamExt;

        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path()).unwrap();
        let dir = workspace.path().to_path_buf();
        std::fs::write(workspace.archive_path(), vec![1u8; STREAM_CHUNK_SIZE * 3]).unwrap();

        let file = tokio::fs::File::open(workspace.archive_path()).await.unwrap();
        let mut stream = Box::pin(archive_stream(file, workspace));
        assert!(stream.next().await.is_some());
        drop(stream);

        // Removal runs on the blocking pool.
        for _ in 0..40 {
            if !dir.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("workspace {:?} was not removed", dir);
    }
}
