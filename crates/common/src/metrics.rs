//! Prometheus metrics for the polling loop.
//!
//! A [`Metrics`] handle is cheap to clone. When metrics are not exposed the
//! handle is created with [`Metrics::disabled`] and every recording call is a
//! no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Metric label values.
pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const EXPLORER_UNAVAILABLE: &str = "explorer_unavailable";
    pub const STORAGE_ERROR: &str = "storage_error";

    pub const SENT: &str = "sent";
    pub const FAILED_TRANSIENT: &str = "failed_transient";
    pub const FAILED_PERMANENT: &str = "failed_permanent";
    pub const UNDELIVERABLE: &str = "undeliverable";
}

struct MetricsInner {
    registry: Registry,
    polls: IntCounterVec,
    explorer_request_seconds: Histogram,
    explorer_retries: IntCounter,
    events_detected: IntCounter,
    notifications: IntCounterVec,
    ticks: IntCounter,
    tick_duration_seconds: Histogram,
    tick_addresses_checked: IntGauge,
    checks_skipped: IntCounter,
    last_successful_poll: IntGaugeVec,
}

#[derive(Clone, Default)]
pub struct Metrics {
    inner: Option<Arc<MetricsInner>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Metrics {
    /// Create a handle backed by a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls = IntCounterVec::new(
            Opts::new("chainwatch_polls_total", "Address checks by outcome"),
            &["outcome"],
        )?;
        let explorer_request_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "chainwatch_explorer_request_seconds",
                "Latency of individual explorer requests",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        let explorer_retries = IntCounter::new(
            "chainwatch_explorer_retries_total",
            "Explorer calls retried after a transient failure",
        )?;
        let events_detected = IntCounter::new(
            "chainwatch_events_detected_total",
            "New on-chain events detected across all addresses",
        )?;
        let notifications = IntCounterVec::new(
            Opts::new(
                "chainwatch_notifications_total",
                "Notification tasks by terminal outcome",
            ),
            &["outcome"],
        )?;
        let ticks = IntCounter::new("chainwatch_ticks_total", "Scheduler ticks started")?;
        let tick_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "chainwatch_tick_duration_seconds",
                "Time from tick start until all of its checks finished",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        let tick_addresses_checked = IntGauge::new(
            "chainwatch_tick_addresses_checked",
            "Addresses checked in the most recent tick",
        )?;
        let checks_skipped = IntCounter::new(
            "chainwatch_checks_skipped_total",
            "Checks skipped because the previous check of the address was still running",
        )?;
        let last_successful_poll = IntGaugeVec::new(
            Opts::new(
                "chainwatch_last_successful_poll_timestamp",
                "Unix time of the last successful check per address",
            ),
            &["address"],
        )?;

        registry.register(Box::new(polls.clone()))?;
        registry.register(Box::new(explorer_request_seconds.clone()))?;
        registry.register(Box::new(explorer_retries.clone()))?;
        registry.register(Box::new(events_detected.clone()))?;
        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(tick_duration_seconds.clone()))?;
        registry.register(Box::new(tick_addresses_checked.clone()))?;
        registry.register(Box::new(checks_skipped.clone()))?;
        registry.register(Box::new(last_successful_poll.clone()))?;

        Ok(Self {
            inner: Some(Arc::new(MetricsInner {
                registry,
                polls,
                explorer_request_seconds,
                explorer_retries,
                events_detected,
                notifications,
                ticks,
                tick_duration_seconds,
                tick_addresses_checked,
                checks_skipped,
                last_successful_poll,
            })),
        })
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn record_poll(&self, outcome: &str) {
        if let Some(m) = &self.inner {
            m.polls.with_label_values(&[outcome]).inc();
        }
    }

    pub fn record_explorer_request(&self, elapsed: Duration) {
        if let Some(m) = &self.inner {
            m.explorer_request_seconds.observe(elapsed.as_secs_f64());
        }
    }

    pub fn record_explorer_retry(&self) {
        if let Some(m) = &self.inner {
            m.explorer_retries.inc();
        }
    }

    pub fn record_events_detected(&self, count: usize) {
        if let Some(m) = &self.inner {
            m.events_detected.inc_by(count as u64);
        }
    }

    pub fn record_notification(&self, outcome: &str) {
        if let Some(m) = &self.inner {
            m.notifications.with_label_values(&[outcome]).inc();
        }
    }

    pub fn record_tick_started(&self) {
        if let Some(m) = &self.inner {
            m.ticks.inc();
        }
    }

    pub fn record_tick_finished(&self, addresses_checked: usize, elapsed: Duration) {
        if let Some(m) = &self.inner {
            m.tick_addresses_checked.set(addresses_checked as i64);
            m.tick_duration_seconds.observe(elapsed.as_secs_f64());
        }
    }

    pub fn record_check_skipped(&self) {
        if let Some(m) = &self.inner {
            m.checks_skipped.inc();
        }
    }

    pub fn record_successful_poll(&self, address: &str, at: DateTime<Utc>) {
        if let Some(m) = &self.inner {
            m.last_successful_poll
                .with_label_values(&[address])
                .set(at.timestamp());
        }
    }

    pub fn polls(&self, outcome: &str) -> u64 {
        self.inner
            .as_ref()
            .map(|m| m.polls.with_label_values(&[outcome]).get())
            .unwrap_or(0)
    }

    pub fn notifications(&self, outcome: &str) -> u64 {
        self.inner
            .as_ref()
            .map(|m| m.notifications.with_label_values(&[outcome]).get())
            .unwrap_or(0)
    }

    pub fn events_detected(&self) -> u64 {
        self.inner
            .as_ref()
            .map(|m| m.events_detected.get())
            .unwrap_or(0)
    }

    pub fn checks_skipped(&self) -> u64 {
        self.inner
            .as_ref()
            .map(|m| m.checks_skipped.get())
            .unwrap_or(0)
    }

    pub fn ticks(&self) -> u64 {
        self.inner.as_ref().map(|m| m.ticks.get()).unwrap_or(0)
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let Some(m) = &self.inner else {
            return Ok(String::new());
        };

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&m.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
