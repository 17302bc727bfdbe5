//! HTTP and WebSocket surface.
//!
//! | Route          | Method | Purpose                                          |
//! |----------------|--------|--------------------------------------------------|
//! | `/v1/logs`     | POST   | Ingest a JSON array of log records               |
//! | `/logs`        | GET    | Time-range query (`start`/`end`, RFC 3339)       |
//! | `/ws`          | GET    | WebSocket stream of newly stored records         |
//! | `/health`      | GET    | Aggregated daemon health                         |
//!
//! CORS is permissive so browser dashboards on other origins can connect.

mod http;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use watchdata_log_stream::{FanOutHub, IngestIntake, LogStore, LogStream, StoreWriter};

/// Shared state handed to every handler.
pub struct AppState<S: LogStore> {
    /// Ingest path (store write only).
    pub intake: IngestIntake<S>,
    /// Range query path.
    pub writer: StoreWriter<S>,
    /// Subscriber registry for WebSocket clients.
    pub hub: Arc<FanOutHub>,
    /// Stream handle used for health reporting.
    pub stream: Arc<Mutex<LogStream<S>>>,
    /// Per-connection send buffer.
    pub subscriber_buffer: usize,
    /// Daemon start time.
    pub start_time: Instant,
    /// Cancelled on daemon shutdown; closes open WebSocket connections.
    pub shutdown: CancellationToken,
}

impl<S: LogStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            intake: self.intake.clone(),
            writer: self.writer.clone(),
            hub: Arc::clone(&self.hub),
            stream: Arc::clone(&self.stream),
            subscriber_buffer: self.subscriber_buffer,
            start_time: self.start_time,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Build the application router.
pub fn router<S: LogStore>(state: AppState<S>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/logs", post(http::ingest_logs::<S>))
        .route("/logs", get(http::query_logs::<S>))
        .route("/health", get(http::health::<S>))
        .route("/ws", get(ws::handle_ws::<S>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router until `state.shutdown` is cancelled.
pub async fn serve<S: LogStore>(
    listener: TcpListener,
    state: AppState<S>,
    max_body_bytes: usize,
) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state, max_body_bytes);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(listen_addr = %addr, "HTTP server listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server failed: {}", e))
}

pub use http::health_report;
