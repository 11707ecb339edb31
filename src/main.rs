//! Budget guard service entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use budget_guard::api::{self, AppState};
use budget_guard::gcp::{
    self, ComputeEngineClient, FirestoreOverrideStore, MetadataTokenSource, StaticTokenSource,
    TokenSource,
};
use budget_guard::{BudgetController, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budget_guard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    match config.target.resolve() {
        Ok(target) => tracing::info!(instance = %target, "Shutdown target configured"),
        Err(missing) => tracing::warn!(
            missing = ?missing,
            "Shutdown target incomplete; critical events will be reported but cannot stop anything"
        ),
    }
    tracing::info!(
        warn = config.thresholds.warn,
        critical = config.thresholds.critical,
        max_override_ratio = config.max_override_ratio,
        max_attempts = config.retry.max_attempts,
        "Budget guard thresholds"
    );

    let http = gcp::http_client()?;
    let tokens: Arc<dyn TokenSource> = match &config.access_token {
        Some(token) => {
            tracing::info!("Using static access token from GCP_ACCESS_TOKEN");
            Arc::new(StaticTokenSource::new(token.clone()))
        }
        None => Arc::new(MetadataTokenSource::new(http.clone())),
    };

    if config.override_project_id.is_none() {
        tracing::warn!("No project for the override store; overrides will read as unavailable");
    }
    let store = Arc::new(FirestoreOverrideStore::new(
        http.clone(),
        Arc::clone(&tokens),
        config.override_project_id.clone(),
        config.override_collection.clone(),
    ));
    let compute = Arc::new(ComputeEngineClient::new(http, tokens));

    let shutdown = CancellationToken::new();
    let controller = BudgetController::from_config(&config, store, compute, shutdown.clone());
    let state = Arc::new(AppState { controller });

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    api::serve(addr, state, shutdown).await
}

async fn wait_for_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received; abandoning in-flight retries");
    token.cancel();
}
