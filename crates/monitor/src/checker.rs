//! One check of one address: fetch, detect, dispatch, persist.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use chainwatch_common::error::{WatchError, WatchResult};
use chainwatch_common::metrics::{Metrics, outcome};
use chainwatch_common::retry::{Attempt, RetryPolicy, retry};
use chainwatch_common::types::{Cursor, MonitoredAddress};
use chainwatch_engine::{ChangeDetector, CursorStore};
use chainwatch_explorer::Explorer;
use chainwatch_notifier::Dispatcher;

/// What a successful check did.
#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub new_events: usize,
    /// New events below the dust threshold; not dispatched.
    pub dust: usize,
    pub cursor: Cursor,
}

pub struct AddressChecker {
    explorer: Explorer,
    store: Arc<dyn CursorStore>,
    dispatcher: Arc<Dispatcher>,
    lookback: Duration,
    storage_policy: RetryPolicy,
    metrics: Metrics,
}

impl AddressChecker {
    pub fn new(
        explorer: Explorer,
        store: Arc<dyn CursorStore>,
        dispatcher: Arc<Dispatcher>,
        lookback: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            explorer,
            store,
            dispatcher,
            lookback,
            storage_policy: RetryPolicy::exponential(
                3,
                Duration::from_millis(200),
                Duration::from_secs(2),
            ),
            metrics,
        }
    }

    /// Run one check for `address` and record its outcome.
    ///
    /// On error the stored cursor is left as it was before the failing step,
    /// so the next tick picks up from there.
    pub async fn check(&self, address: &MonitoredAddress) -> WatchResult<CheckSummary> {
        let result = self.run(address).await;

        match &result {
            Ok(summary) => {
                self.metrics.record_poll(outcome::SUCCESS);
                self.metrics
                    .record_successful_poll(&address.address, summary.cursor.last_checked_at);
            }
            Err(e) => self.metrics.record_poll(e.kind()),
        }
        result
    }

    async fn run(&self, address: &MonitoredAddress) -> WatchResult<CheckSummary> {
        let previous = self.store.load(&address.address).await?;

        let events = self.explorer.fetch(&address.address, self.lookback).await?;
        let fetched = events.len();

        let now = Utc::now();
        let detection = ChangeDetector::detect(events, previous.as_ref(), now);
        let new_events = detection.new_events.len();

        if previous.as_ref().is_none_or(Cursor::is_bootstrap) && new_events > 0 {
            tracing::info!(
                address = %address.address,
                events = new_events,
                "No cursor yet, notifying every event in the lookback window"
            );
        }
        tracing::debug!(
            address = %address.address,
            fetched,
            new_events,
            "Change detection complete"
        );
        self.metrics.record_events_detected(new_events);

        let mut dust = 0;
        for event in &detection.new_events {
            if event.payload.is_dust() {
                dust += 1;
                tracing::debug!(
                    address = %address.address,
                    event_id = %event.id,
                    value_delta = event.payload.value_delta,
                    "Dust transaction, not notifying"
                );
                self.save(&address.address, &Cursor::at(event, now)).await?;
                continue;
            }

            let reports = self.dispatcher.dispatch(address, event).await;
            let sent = reports.iter().filter(|r| r.outcome.is_sent()).count();
            tracing::info!(
                address = %address.address,
                nickname = %address.nickname,
                event_id = %event.id,
                destinations = reports.len(),
                sent,
                "Event dispatched"
            );

            // Checkpoint so a crash mid-batch resumes after this event.
            self.save(&address.address, &Cursor::at(event, now)).await?;
        }

        self.save(&address.address, &detection.next_cursor).await?;

        Ok(CheckSummary {
            new_events,
            dust,
            cursor: detection.next_cursor,
        })
    }

    async fn save(&self, address: &str, cursor: &Cursor) -> WatchResult<()> {
        retry(&self.storage_policy, |attempt| async move {
            match self.store.save(address, cursor).await {
                Ok(()) => Attempt::Success(()),
                Err(e) => {
                    tracing::warn!(address, attempt, error = %e, "Cursor save failed");
                    Attempt::transient(e)
                }
            }
        })
        .await
        .map_err(|e| match e.into_error() {
            storage @ WatchError::Storage(_) => storage,
            other => WatchError::Storage(other.to_string()),
        })
    }
}
