//! HTTP API
//!
//! # Endpoints
//!
//! ## Objectives
//! - `POST /api/v1/objectives` - Create an objective and start its loop
//! - `GET /api/v1/objectives?workspace=` - Objective summaries
//! - `GET /api/v1/objectives/{id}` - Conversation snapshot
//! - `POST /api/v1/objectives/{id}/respond` - Answer a question or add a follow-up
//! - `POST /api/v1/objectives/{id}/cancel` - Cancel
//! - `GET /api/v1/objectives/{id}/stream` - Server-sent events
//!
//! ## Tools
//! - `GET /api/v1/tools` - Tool descriptors
//! - `GET /api/v1/tools/schema` - Tool name to JSON Schema
//! - `GET /api/v1/tools/{name}` - One descriptor
//! - `GET /api/v1/tools/{name}/metrics` - Execution counters
//!
//! ## Workspaces
//! - `POST /api/v1/workspaces/{name}/save` - Force a save
//!
//! - `GET /health` - Health check

pub mod routes;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use state::AppState;

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        // Objectives
        .route(
            "/api/v1/objectives",
            post(routes::create_objective).get(routes::list_objectives),
        )
        .route("/api/v1/objectives/{id}", get(routes::get_objective))
        .route("/api/v1/objectives/{id}/respond", post(routes::respond))
        .route("/api/v1/objectives/{id}/cancel", post(routes::cancel_objective))
        .route("/api/v1/objectives/{id}/stream", get(routes::stream_objective))
        // Tools
        .route("/api/v1/tools", get(routes::list_tools))
        .route("/api/v1/tools/schema", get(routes::tool_schemas))
        .route("/api/v1/tools/{name}", get(routes::get_tool))
        .route("/api/v1/tools/{name}/metrics", get(routes::tool_metrics))
        // Workspaces
        .route("/api/v1/workspaces/{name}/save", post(routes::save_workspace))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting Pixlie engine API server");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
