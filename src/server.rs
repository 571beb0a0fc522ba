//! HTTP query server.
//!
//! Exposes the [`RetrievalPipeline`] as a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/query?q=...&limit=N` | Ranked chunks for `q` |
//! | `POST` | `/query` | Same, body `{"query": "...", "limit": N}` |
//! | `GET`  | `/chunks/{id}` | One chunk by id |
//! | `GET`  | `/health` | Liveness (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `timeout` | 408 |
//! | `storage_error`, `internal` | 500 |
//! | `upstream_error`, `dependency_error` | 502 |
//! | `cancelled` | 503 |
//!
//! # Lifecycle
//!
//! `Created → Listening → ShuttingDown → Stopped`, observable through
//! [`QueryServer::subscribe`]. Once a [`ShutdownHandle`] fires, the
//! listener stops accepting and in-flight requests get
//! `shutdown_grace_secs` to finish. After that their work is cancelled
//! (they answer 503) and [`QueryServer::serve`] returns.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::cancel::CancellationToken;
use crate::config::ServerConfig;
use crate::error::{RagError, Result};
use crate::models::{Chunk, RankedChunk};
use crate::retrieval::RetrievalPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
}

/// Triggers a graceful shutdown of the server it was taken from.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

pub struct QueryServer {
    pipeline: Arc<RetrievalPipeline>,
    config: ServerConfig,
    state: Arc<watch::Sender<ServerState>>,
    /// Fired by [`ShutdownHandle`]: stop accepting, start draining.
    shutdown: CancellationToken,
    /// Fired when the grace period runs out: cancel in-flight work.
    abort: CancellationToken,
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RetrievalPipeline>,
    request_timeout: Duration,
    abort: CancellationToken,
}

impl QueryServer {
    pub fn new(pipeline: Arc<RetrievalPipeline>, config: ServerConfig) -> Self {
        let (state, _rx) = watch::channel(ServerState::Created);
        Self {
            pipeline,
            config,
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Route table with CORS; exposed so tests can drive it directly.
    pub fn router(&self) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
            request_timeout: Duration::from_secs(self.config.request_timeout_secs.max(1)),
            abort: self.abort.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/query", get(handle_query_get).post(handle_query_post))
            .route("/chunks/{id}", get(handle_get_chunk))
            .route("/health", get(handle_health))
            .layer(cors)
            .with_state(state)
    }

    /// Binds `bind_address` and serves until shut down.
    pub async fn start(&self, bind_address: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            self.state.send_replace(ServerState::Stopped);
            return Ok(());
        }
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|e| RagError::config(format!("cannot bind {}: {}", bind_address, e)))?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener until shut down.
    ///
    /// A clean shutdown and a listener that closed on its own both return
    /// `Ok`.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let started = self.state.send_if_modified(|state| {
            if *state == ServerState::Created {
                *state = ServerState::Listening;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(RagError::invalid("server was already started"));
        }
        if self.shutdown.is_cancelled() {
            self.state.send_replace(ServerState::Stopped);
            return Ok(());
        }

        let addr: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(?addr, "query server listening");

        let shutdown = self.shutdown.clone();
        let state = self.state.clone();
        let serve = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                state.send_replace(ServerState::ShuttingDown);
                tracing::info!("query server draining");
            })
            .into_future();
        let mut serve = std::pin::pin!(serve);

        let outcome = tokio::select! {
            out = &mut serve => out,
            _ = self.shutdown.cancelled() => {
                let grace = Duration::from_secs(self.config.shutdown_grace_secs);
                match tokio::time::timeout(grace, &mut serve).await {
                    Ok(out) => out,
                    Err(_) => {
                        tracing::warn!(?grace, "grace period elapsed, cancelling in-flight requests");
                        self.abort.cancel();
                        Ok(())
                    }
                }
            }
        };

        if let Err(e) = outcome {
            tracing::warn!(error = %e, "listener closed");
        }
        self.state.send_replace(ServerState::Stopped);
        tracing::info!("query server stopped");
        Ok(())
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RagError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RagError::Dependency { .. } => (StatusCode::BAD_GATEWAY, "dependency_error"),
            RagError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            RagError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            RagError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::warn!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ Handlers ============

#[derive(Deserialize)]
struct QueryParams {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct QueryBody {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// Runs handler work under the request timeout and the server's abort token.
async fn bounded<T, F>(state: &AppState, work: F) -> std::result::Result<T, AppError>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(state.request_timeout, state.abort.run(work)).await {
        Ok(out) => Ok(out?),
        Err(_) => Err(AppError {
            status: StatusCode::REQUEST_TIMEOUT,
            code: "timeout",
            message: format!("request timed out after {:?}", state.request_timeout),
        }),
    }
}

async fn run_query(
    state: &AppState,
    text: &str,
    limit: Option<usize>,
) -> std::result::Result<Json<Vec<RankedChunk>>, AppError> {
    let limit = limit.unwrap_or_else(|| state.pipeline.default_limit());
    let results = bounded(state, state.pipeline.query(text, limit, &state.abort)).await?;
    Ok(Json(results))
}

async fn handle_query_get(
    State(state): State<AppState>,
    params: std::result::Result<Query<QueryParams>, QueryRejection>,
) -> std::result::Result<Json<Vec<RankedChunk>>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let text = params.q.unwrap_or_default();
    run_query(&state, &text, params.limit).await
}

async fn handle_query_post(
    State(state): State<AppState>,
    body: std::result::Result<Json<QueryBody>, JsonRejection>,
) -> std::result::Result<Json<Vec<RankedChunk>>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    run_query(&state, &body.query, body.limit).await
}

async fn handle_get_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<Chunk>, AppError> {
    let chunk = bounded(&state, state.pipeline.get_document_chunk(&id)).await?;
    Ok(Json(chunk))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
