pub mod health;
pub mod metrics;

use axum::Router;

use crate::state::AppState;

/// Build the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .with_state(state)
}
