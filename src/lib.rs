pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod mirror;
pub mod money;
pub mod order;
pub mod retry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use cart::{CartLine, CartObserver, CartSnapshot, CartState, CartStore};
pub use catalog::{InMemoryCatalog, Product, ProductId, ProductRepository};
pub use checkout::{Checkout, CheckoutConfig, CheckoutError};
pub use config::{CliArgs, ServerConfig};
pub use error::{ApiError, ErrorCode, ValidationError, ValidationErrors};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use money::Money;
pub use server::{AppState, router};
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use shutdown::CartMirrorShutdownHandler;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::OK, metrics::METRICS.encode())
}

/// Full application router: storefront routes plus health and metrics.
pub fn app(state: AppState, config: &ServerConfig) -> Router {
    let checker = Arc::new(health::HealthChecker::new(
        state.catalog.clone(),
        state.sessions.clone(),
        config.mirror_dir.clone(),
    ));
    let probes = Router::new()
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .with_state(checker);

    router(state, config.enable_admin)
        .merge(probes)
        .route("/metrics", get(metrics_handler))
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let catalog = match config.catalog_path.as_deref() {
        Some(path) => InMemoryCatalog::load(path)?,
        None => {
            tracing::warn!("no catalog configured, starting with an empty catalog");
            InMemoryCatalog::new()
        }
    };
    if let Some(dir) = config.mirror_dir.as_deref() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create mirror directory {:?}", dir))?;
    }

    let state = AppState::new(catalog, &config);

    let mut coordinator = ShutdownCoordinator::new(
        ShutdownConfig::default().with_grace_period(config.shutdown_timeout),
    );
    coordinator.add_handler(Box::new(CartMirrorShutdownHandler::new(
        state.sessions.clone(),
    )));
    let coordinator = Arc::new(coordinator);

    tracing::info!(
        products = state.catalog.len(),
        mirror = ?config.mirror_dir,
        admin = config.enable_admin,
        checkout_timeout_ms = config.checkout_timeout.as_millis() as u64,
        checkout_attempts = config.checkout_max_attempts,
        "starting storefront",
    );

    let router = app(state, &config);
    let listener = TcpListener::bind(config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(bind = %actual_addr, "listening");

    let signal = coordinator.clone();
    let server_future = axum::serve(listener, router)
        .with_graceful_shutdown(async move { signal.wait_for_signal().await })
        .into_future();
    tokio::pin!(server_future);

    let server_result = tokio::select! {
        result = &mut server_future => result.map_err(anyhow::Error::from),
        _ = coordinator.drain_deadline() => {
            tracing::warn!(
                grace_secs = config.shutdown_timeout.as_secs(),
                "in-flight requests did not finish in time, closing"
            );
            Ok(())
        }
    };

    tracing::info!("server stopped, running shutdown handlers");
    if let Err(e) = coordinator.run_handlers().await {
        tracing::error!("error during shutdown: {}", e);
    }

    server_result
}
