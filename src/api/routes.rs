//! HTTP routes and server loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::controller::{BudgetController, EventReport};

/// Shared state for all handlers.
pub struct AppState {
    pub controller: BudgetController,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(handle_event))
        .route("/events", post(handle_event))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening for budget events on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Every event is acknowledged with 200, including rejected ones, so the
/// push subscription does not redeliver it.
async fn handle_event(State(state): State<Arc<AppState>>, body: Bytes) -> Json<EventReport> {
    Json(state.controller.handle_payload(&body).await)
}
