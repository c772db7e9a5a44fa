//! Daily balance report.
//!
//! Once a day at `hour:00` UTC, every opted-in address's confirmed balance is
//! fetched and each destination receives one message covering the addresses
//! routed to it.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use chainwatch_common::types::{AddressBalance, Destination, MonitoredAddress};
use chainwatch_engine::MessageFormatter;
use chainwatch_explorer::Explorer;
use chainwatch_notifier::{Dispatcher, TaskReport};

pub struct BalanceReporter {
    explorer: Explorer,
    dispatcher: Arc<Dispatcher>,
    addresses: Vec<MonitoredAddress>,
    hour: u32,
}

impl BalanceReporter {
    /// `hour` is clamped to 0..=23.
    pub fn new(
        explorer: Explorer,
        dispatcher: Arc<Dispatcher>,
        addresses: Vec<MonitoredAddress>,
        hour: u32,
    ) -> Self {
        Self {
            explorer,
            dispatcher,
            addresses: addresses.into_iter().filter(|a| a.is_deliverable()).collect(),
            hour: hour.min(23),
        }
    }

    /// First `hour:00` UTC strictly after `now`.
    pub fn next_report_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_hms_opt(self.hour, 0, 0).map(|at| Utc.from_utc_datetime(&at));
        match today {
            Some(at) if at > now => at,
            Some(at) => at + ChronoDuration::days(1),
            // Unreachable with hour <= 23; fall back to the next full hour.
            None => {
                let next = now + ChronoDuration::hours(1);
                next.with_minute(0).and_then(|t| t.with_second(0)).unwrap_or(next)
            }
        }
    }

    /// Fetch balances and send one report per destination.
    ///
    /// An address whose balance cannot be fetched is listed as unavailable
    /// rather than holding back the whole report.
    pub async fn report(&self, at: DateTime<Utc>) -> Vec<TaskReport> {
        let mut balances: Vec<Option<AddressBalance>> = Vec::with_capacity(self.addresses.len());
        for address in &self.addresses {
            match self.explorer.balance(&address.address).await {
                Ok(balance) => balances.push(Some(balance)),
                Err(e) => {
                    tracing::warn!(
                        address = %address.address,
                        error = %e,
                        "Balance unavailable for daily report"
                    );
                    balances.push(None);
                }
            }
        }

        // Destinations in first-seen order, each with the addresses routed to it.
        let mut groups: Vec<(Destination, Vec<usize>)> = Vec::new();
        for (index, address) in self.addresses.iter().enumerate() {
            for destination in &address.destinations {
                match groups.iter_mut().find(|(d, _)| d == destination) {
                    Some((_, indices)) => indices.push(index),
                    None => groups.push((destination.clone(), vec![index])),
                }
            }
        }

        let mut reports = Vec::new();
        for (destination, indices) in groups {
            let entries: Vec<_> = indices
                .iter()
                .map(|&i| (&self.addresses[i], balances[i].as_ref()))
                .collect();
            let text = MessageFormatter::render_balance_report(&entries, at);
            reports.extend(
                self.dispatcher
                    .send_report(std::slice::from_ref(&destination), "balance_report", &text)
                    .await,
            );
        }

        let sent = reports.iter().filter(|r| r.outcome.is_sent()).count();
        tracing::info!(
            addresses = self.addresses.len(),
            destinations = reports.len(),
            sent,
            "Daily balance report sent"
        );
        reports
    }

    /// Send a report every day at the configured hour until `cancel` fires.
    ///
    /// Waits run on the runtime clock, anchored to the wall clock once at
    /// start.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if self.addresses.is_empty() {
            tracing::info!("No deliverable addresses opted into the daily balance report");
            return;
        }

        let anchor_wall = Utc::now();
        let anchor = Instant::now();
        let wall_now = || {
            ChronoDuration::from_std(anchor.elapsed())
                .map(|elapsed| anchor_wall + elapsed)
                .unwrap_or_else(|_| Utc::now())
        };

        let mut target = self.next_report_after(anchor_wall);
        tracing::info!(next_report = %target, hour = self.hour, "Daily balance report scheduled");

        loop {
            let deadline = anchor + (target - anchor_wall).to_std().unwrap_or_default();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => {}
            }

            self.report(target).await;
            target = self.next_report_after(target.max(wall_now()));
            tracing::debug!(next_report = %target, "Daily balance report scheduled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainwatch_common::metrics::Metrics;
    use chainwatch_common::retry::{Attempt, RetryPolicy};
    use chainwatch_common::types::{Event, TokenBalance};
    use chainwatch_explorer::{EventSource, ExplorerError};
    use chainwatch_notifier::{DeliveryError, NotificationSender};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Balances by address; unknown addresses fail permanently.
    struct BalanceSource(Vec<(&'static str, u64)>);

    #[async_trait]
    impl EventSource for BalanceSource {
        async fn fetch(&self, _: &str, _: Duration) -> Attempt<Vec<Event>, ExplorerError> {
            Attempt::Success(vec![])
        }

        async fn balance(&self, address: &str) -> Attempt<AddressBalance, ExplorerError> {
            match self.0.iter().find(|(a, _)| *a == address) {
                Some((_, nano_ergs)) => Attempt::Success(AddressBalance {
                    nano_ergs: *nano_ergs,
                    tokens: vec![TokenBalance {
                        token_id: "03faf2cb329f2e90".to_string(),
                        name: Some("SigUSD".to_string()),
                        decimals: Some(2),
                        amount: 250,
                    }],
                }),
                None => Attempt::Permanent(ExplorerError::Status {
                    status: 404,
                    body: String::new(),
                }),
            }
        }

        async fn probe(&self) -> Attempt<(), ExplorerError> {
            Attempt::Success(())
        }
    }

    #[derive(Default)]
    struct RecordingSender(Mutex<Vec<(Destination, String)>>);

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, destination: &Destination, text: &str) -> Attempt<(), DeliveryError> {
            self.0.lock().unwrap().push((destination.clone(), text.to_string()));
            Attempt::Success(())
        }
    }

    fn monitored(address: &str, nickname: &str, chats: &[&str]) -> MonitoredAddress {
        MonitoredAddress {
            address: address.to_string(),
            nickname: nickname.to_string(),
            destinations: chats.iter().map(|c| Destination::new(*c, None)).collect(),
        }
    }

    fn reporter(sender: Arc<RecordingSender>, addresses: Vec<MonitoredAddress>, hour: u32) -> BalanceReporter {
        let source = Arc::new(BalanceSource(vec![("9aaa", 1_500_000_000), ("9bbb", 0)]));
        let explorer = Explorer::new(source, RetryPolicy::fixed(0, Duration::ZERO), Metrics::disabled());
        let dispatcher = Arc::new(Dispatcher::new(sender, Metrics::disabled()));
        BalanceReporter::new(explorer, dispatcher, addresses, hour)
    }

    #[test]
    fn test_next_report_after() {
        let reporter = reporter(Arc::new(RecordingSender::default()), vec![], 12);
        let morning = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(reporter.next_report_after(morning), noon);
        assert_eq!(
            reporter.next_report_after(noon),
            Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
        );
        assert_eq!(
            reporter.next_report_after(Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap()),
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_one_message_per_destination() {
        let sender = Arc::new(RecordingSender::default());
        let reporter = reporter(
            sender.clone(),
            vec![
                monitored("9aaa", "Treasury", &["ops", "board"]),
                monitored("9bbb", "Hot", &["ops"]),
                monitored("9ccc", "Missing", &["ops"]),
                monitored("9ddd", "Nowhere", &[]),
            ],
            12,
        );

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reports = reporter.report(at).await;

        assert_eq!(reports.len(), 2);
        let sent = sender.0.lock().unwrap().clone();
        let ops = &sent.iter().find(|(d, _)| d.chat_id == "ops").unwrap().1;
        let board = &sent.iter().find(|(d, _)| d.chat_id == "board").unwrap().1;

        assert!(ops.contains("<b>Treasury</b>\nERG: <code>1.500000000</code>"));
        assert!(ops.contains("<b>Hot</b>\nERG: <code>0.000000000</code>"));
        assert!(ops.contains("<b>Missing</b>\nERG: balance unavailable"));
        assert!(!ops.contains("Nowhere"));
        assert!(board.contains("<b>Treasury</b>"));
        assert!(!board.contains("<b>Hot</b>"));
        assert!(board.contains("<code>2.50</code> SigUSD"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_a_day_at_the_configured_hour() {
        let sender = Arc::new(RecordingSender::default());
        let hour = (Utc::now().hour() + 12) % 24;
        let reporter = Arc::new(reporter(
            sender.clone(),
            vec![monitored("9aaa", "Treasury", &["ops"])],
            hour,
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter.run(cancel.clone()));

        // The target is 11 to 12 hours away.
        tokio::time::sleep(Duration::from_secs(10 * 3600)).await;
        assert!(sender.0.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert_eq!(sender.0.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert_eq!(sender.0.lock().unwrap().len(), 2);
        assert!(sender.0.lock().unwrap()[1].1.contains("Daily Balance Report"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reportable_addresses_returns_immediately() {
        let sender = Arc::new(RecordingSender::default());
        let reporter = Arc::new(reporter(sender.clone(), vec![monitored("9aaa", "A", &[])], 12));

        reporter.run(CancellationToken::new()).await;
        assert!(sender.0.lock().unwrap().is_empty());
    }
}
