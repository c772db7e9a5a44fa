use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use chainwatch_common::config::ExplorerConfig;
use chainwatch_common::error::{WatchError, WatchResult};
use chainwatch_common::metrics::Metrics;
use chainwatch_common::retry::{Attempt, RetryPolicy, retry};
use chainwatch_common::types::{AddressBalance, Event};

use crate::EventSource;

/// Explorer access with the configured retry policy applied.
///
/// Retries use a fixed `retry_delay`; a rate-limit `Retry-After` from the
/// explorer replaces the delay for that one wait.
#[derive(Clone)]
pub struct Explorer {
    source: Arc<dyn EventSource>,
    policy: RetryPolicy,
    metrics: Metrics,
}

impl Explorer {
    pub fn new(source: Arc<dyn EventSource>, policy: RetryPolicy, metrics: Metrics) -> Self {
        Self {
            source,
            policy,
            metrics,
        }
    }

    /// `max_retries` and `retry_delay` taken verbatim from the config.
    pub fn from_config(config: &ExplorerConfig, source: Arc<dyn EventSource>, metrics: Metrics) -> Self {
        Self::new(
            source,
            RetryPolicy::fixed(config.max_retries, config.retry_delay()),
            metrics,
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch events for `address` within `lookback`, oldest-first.
    ///
    /// Fails with [`WatchError::ExplorerUnavailable`] once retries run out or
    /// the explorer rejects the request outright.
    pub async fn fetch(&self, address: &str, lookback: Duration) -> WatchResult<Vec<Event>> {
        let result = retry(&self.policy, |attempt| async move {
            if attempt > 1 {
                self.metrics.record_explorer_retry();
            }
            let started = Instant::now();
            let outcome = self.source.fetch(address, lookback).await;
            self.metrics.record_explorer_request(started.elapsed());

            match &outcome {
                Attempt::Transient { error, .. } => {
                    tracing::warn!(
                        address,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %error,
                        "Explorer request failed, will retry if attempts remain"
                    );
                }
                Attempt::Permanent(error) => {
                    tracing::error!(address, attempt, error = %error, "Explorer rejected request");
                }
                Attempt::Success(events) => {
                    tracing::debug!(address, attempt, events = events.len(), "Explorer fetch complete");
                }
            }
            outcome
        })
        .await;

        result.map_err(|e| WatchError::ExplorerUnavailable {
            address: address.to_string(),
            attempts: e.attempts(),
            reason: e.into_error().to_string(),
        })
    }

    /// Confirmed balance of `address`, retried like [`fetch`](Self::fetch).
    pub async fn balance(&self, address: &str) -> WatchResult<AddressBalance> {
        retry(&self.policy, |attempt| async move {
            if attempt > 1 {
                self.metrics.record_explorer_retry();
            }
            let started = Instant::now();
            let outcome = self.source.balance(address).await;
            self.metrics.record_explorer_request(started.elapsed());

            if let Attempt::Transient { error, .. } = &outcome {
                tracing::warn!(address, attempt, error = %error, "Balance request failed");
            }
            outcome
        })
        .await
        .map_err(|e| WatchError::ExplorerUnavailable {
            address: address.to_string(),
            attempts: e.attempts(),
            reason: e.into_error().to_string(),
        })
    }

    /// Startup reachability check, retried like any other call.
    pub async fn probe(&self) -> WatchResult<()> {
        retry(&self.policy, |attempt| async move {
            let outcome = self.source.probe().await;
            if let Attempt::Transient { error, .. } = &outcome {
                tracing::warn!(attempt, error = %error, "Explorer probe failed");
            }
            outcome
        })
        .await
        .map_err(|e| WatchError::ExplorerUnavailable {
            address: "<probe>".to_string(),
            attempts: e.attempts(),
            reason: e.into_error().to_string(),
        })
    }
}
