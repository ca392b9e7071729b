//! HTTP surface for SafeSpace.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /ask` - Route a message through the coordinator, `{message}` in,
//!   `{response}` out
//! - `POST /upload-image-openai` - Describe an uploaded image, multipart
//!   `file` in, `{diagnosis}` or `{error}` out
//!
//! # Architecture
//!
//! ```text
//! Client (web UI)
//!    │
//!    ▼
//! ┌─────────────────┐
//! │   API Gateway   │ ◄── This crate
//! │     (Axum)      │
//! └────────┬────────┘
//!          │
//!          ├──────────────────┐
//!          ▼                  ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │   Coordinator   │ │  Vision client  │
//! │ (route/dispatch)│ │    (uploads)    │
//! └─────────────────┘ └─────────────────┘
//! ```

pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use state::AppState;

/// Largest accepted request body (image uploads included).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/ask", post(routes::ask))
        .route("/upload-image-openai", post(routes::upload_image))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the given address. Stops on Ctrl-C.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = create_router(state);

    info!(%addr, "Starting SafeSpace API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("SafeSpace API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
