//! Shared state for the metrics server.

use std::time::Instant;

use chainwatch_common::metrics::Metrics;

/// State shared across route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Metrics,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            started_at: Instant::now(),
        }
    }
}
