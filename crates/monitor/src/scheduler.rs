//! Periodic driver of address checks.
//!
//! Every `interval` a tick starts one check per address. Checks share a
//! concurrency cap across ticks, and an address whose previous check is still
//! running is skipped for the tick instead of being checked twice at once.
//! An optional daily balance report runs alongside the ticks and stops with
//! them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use chainwatch_common::metrics::Metrics;
use chainwatch_common::types::MonitoredAddress;

use crate::checker::AddressChecker;
use crate::report::BalanceReporter;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub check_concurrency: usize,
    /// Time in-flight checks get to finish after `stop`.
    pub shutdown_grace: Duration,
}

pub struct Scheduler {
    checker: Arc<AddressChecker>,
    addresses: Vec<Arc<MonitoredAddress>>,
    /// One guard per address, built once; held for the whole check.
    guards: HashMap<String, Arc<Mutex<()>>>,
    permits: Arc<Semaphore>,
    reporter: Option<Arc<BalanceReporter>>,
    config: SchedulerConfig,
    metrics: Metrics,
}

/// Running scheduler. Dropping the handle does not stop it; call [`stop`](Self::stop).
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for in-flight checks, aborting them after the
    /// grace period.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

impl Scheduler {
    pub fn new(
        checker: Arc<AddressChecker>,
        addresses: Vec<MonitoredAddress>,
        config: SchedulerConfig,
        metrics: Metrics,
    ) -> Self {
        let guards = addresses
            .iter()
            .map(|a| (a.address.clone(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            checker,
            addresses: addresses.into_iter().map(Arc::new).collect(),
            guards,
            permits: Arc::new(Semaphore::new(config.check_concurrency.max(1))),
            reporter: None,
            config,
            metrics,
        }
    }

    pub fn with_balance_report(mut self, reporter: BalanceReporter) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Spawn the tick loop. The first tick fires immediately.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::new(self).run(cancel.clone()));
        SchedulerHandle { cancel, task }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut tick_number: u64 = 0;

        if let Some(reporter) = &self.reporter {
            tasks.spawn(
                reporter
                    .clone()
                    .run(cancel.clone())
                    .instrument(tracing::info_span!("balance_report")),
            );
        }

        tracing::info!(
            addresses = self.addresses.len(),
            interval_secs = self.config.interval.as_secs(),
            check_concurrency = self.config.check_concurrency,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tick_number += 1;
                    let scheduler = self.clone();
                    let cancel = cancel.clone();
                    tasks.spawn(
                        scheduler
                            .tick(cancel)
                            .instrument(tracing::info_span!("tick", tick = tick_number)),
                    );
                }
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!(error = %e, "Scheduler task failed");
                    }
                }
            }
        }

        tracing::info!(
            in_flight_tasks = tasks.len(),
            grace_secs = self.config.shutdown_grace.as_secs(),
            "Scheduler stopping, waiting for in-flight checks"
        );

        let drain = async {
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "Scheduler task failed");
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                remaining_tasks = tasks.len(),
                "Grace period elapsed, aborting in-flight checks"
            );
            tasks.shutdown().await;
        }

        tracing::info!("Scheduler stopped");
    }

    async fn tick(self: Arc<Self>, cancel: CancellationToken) {
        let started = Instant::now();
        self.metrics.record_tick_started();

        let mut checks = JoinSet::new();
        for address in &self.addresses {
            let Some(guard) = self.guards.get(&address.address) else {
                continue;
            };
            let Ok(guard) = guard.clone().try_lock_owned() else {
                tracing::debug!(
                    address = %address.address,
                    "Previous check still running, skipping address this tick"
                );
                self.metrics.record_check_skipped();
                continue;
            };

            let address = address.clone();
            let checker = self.checker.clone();
            let permits = self.permits.clone();
            let cancel = cancel.clone();
            let span = tracing::info_span!("check", address = %address.address, nickname = %address.nickname);

            checks.spawn(
                async move {
                    let _guard = guard;
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return false;
                    };
                    if cancel.is_cancelled() {
                        return false;
                    }

                    match checker.check(&address).await {
                        Ok(summary) => {
                            tracing::debug!(new_events = summary.new_events, "Check complete");
                        }
                        Err(e) => {
                            // Contained: the address is retried next tick.
                            tracing::warn!(error = %e, kind = e.kind(), "Check failed");
                        }
                    }
                    true
                }
                .instrument(span),
            );
        }

        let mut checked = 0;
        while let Some(finished) = checks.join_next().await {
            match finished {
                Ok(true) => checked += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Check task panicked"),
            }
        }

        let elapsed = started.elapsed();
        self.metrics.record_tick_finished(checked, elapsed);
        tracing::debug!(
            addresses_checked = checked,
            elapsed_ms = elapsed.as_millis() as u64,
            "Tick finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainwatch_common::retry::{Attempt, RetryPolicy};
    use chainwatch_common::types::{AddressBalance, Destination, Event};
    use chainwatch_engine::MemoryCursorStore;
    use chainwatch_explorer::{EventSource, Explorer, ExplorerError};
    use chainwatch_notifier::{DeliveryError, Dispatcher, NotificationSender};
    use chrono::{Timelike, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that takes `delay` per fetch and counts calls.
    struct SlowSource {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventSource for SlowSource {
        async fn fetch(&self, _: &str, _: Duration) -> Attempt<Vec<Event>, ExplorerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Attempt::Success(vec![])
        }

        async fn balance(&self, _: &str) -> Attempt<AddressBalance, ExplorerError> {
            Attempt::Success(AddressBalance {
                nano_ergs: 42,
                tokens: vec![],
            })
        }

        async fn probe(&self) -> Attempt<(), ExplorerError> {
            Attempt::Success(())
        }
    }

    #[derive(Default)]
    struct NullSender(AtomicUsize);

    #[async_trait]
    impl NotificationSender for NullSender {
        async fn send(&self, _: &Destination, _: &str) -> Attempt<(), DeliveryError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Attempt::Success(())
        }
    }

    fn scheduler(source: Arc<SlowSource>, addresses: &[&str], metrics: Metrics, grace: Duration) -> Scheduler {
        let explorer = Explorer::new(source, RetryPolicy::fixed(0, Duration::ZERO), metrics.clone());
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(NullSender::default()), metrics.clone()));
        let checker = Arc::new(AddressChecker::new(
            explorer,
            Arc::new(MemoryCursorStore::new()),
            dispatcher,
            Duration::from_secs(3600),
            metrics.clone(),
        ));
        let addresses = addresses
            .iter()
            .map(|a| MonitoredAddress {
                address: a.to_string(),
                nickname: a.to_string(),
                destinations: vec![Destination::new("1", None)],
            })
            .collect();

        Scheduler::new(
            checker,
            addresses,
            SchedulerConfig {
                interval: Duration::from_secs(10),
                check_concurrency: 4,
                shutdown_grace: grace,
            },
            metrics,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_address_is_skipped_not_overlapped() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(25),
            calls: AtomicUsize::new(0),
        });
        let metrics = Metrics::new().unwrap();
        let handle = scheduler(source.clone(), &["a"], metrics.clone(), Duration::from_secs(60)).start();

        // Ticks at 0, 10 and 20; the check started at 0 runs until 25.
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.checks_skipped(), 2);

        handle.stop().await;
        assert_eq!(metrics.polls(chainwatch_common::metrics::outcome::SUCCESS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_address_checked_each_tick() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(10),
            calls: AtomicUsize::new(0),
        });
        let metrics = Metrics::new().unwrap();
        let handle = scheduler(source.clone(), &["a", "b", "c"], metrics.clone(), Duration::from_secs(5)).start();

        tokio::time::sleep(Duration::from_secs(15)).await;
        handle.stop().await;

        assert_eq!(metrics.ticks(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
        assert_eq!(metrics.checks_skipped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_after_grace_period() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(3600),
            calls: AtomicUsize::new(0),
        });
        let metrics = Metrics::new().unwrap();
        let handle = scheduler(source.clone(), &["a"], metrics.clone(), Duration::from_secs(2)).start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stopping = Instant::now();
        handle.stop().await;

        assert!(stopping.elapsed() >= Duration::from_secs(2));
        assert!(stopping.elapsed() < Duration::from_secs(3600));
        assert_eq!(metrics.polls(chainwatch_common::metrics::outcome::SUCCESS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_report_runs_with_scheduler() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(10),
            calls: AtomicUsize::new(0),
        });
        let metrics = Metrics::disabled();
        let sender = Arc::new(NullSender::default());
        let explorer = Explorer::new(source.clone(), RetryPolicy::fixed(0, Duration::ZERO), metrics.clone());
        let dispatcher = Arc::new(Dispatcher::new(sender.clone(), metrics.clone()));
        let address = MonitoredAddress {
            address: "a".to_string(),
            nickname: "a".to_string(),
            destinations: vec![Destination::new("1", None)],
        };
        let hour = (Utc::now().hour() + 2) % 24;
        let reporter = BalanceReporter::new(explorer, dispatcher, vec![address], hour);

        let handle = scheduler(source.clone(), &["a"], metrics, Duration::from_secs(5))
            .with_balance_report(reporter)
            .start();

        // The report is due 1 to 2 hours from now.
        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert_eq!(sender.0.load(Ordering::SeqCst), 1);

        let stopping = Instant::now();
        handle.stop().await;
        assert!(stopping.elapsed() < Duration::from_secs(5));
    }
}
