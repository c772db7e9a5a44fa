//! Metrics and health endpoints for the watcher.
//!
//! Only started when `prometheus.port` is configured.

pub mod routes;
pub mod state;

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use chainwatch_common::metrics::Metrics;

use crate::routes::create_router;
use crate::state::AppState;

/// Bind the metrics port on all interfaces.
///
/// Kept apart from [`serve`] so a taken port fails startup instead of a
/// background task.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics server to {}", addr))
}

/// Serve `/metrics` and `/health` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    metrics: Metrics,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(AppState::new(metrics)).layer(TraceLayer::new_for_http());

    tracing::info!("Metrics server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Metrics server stopped");
    Ok(())
}
