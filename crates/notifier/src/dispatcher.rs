use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use uuid::Uuid;

use chainwatch_common::metrics::{Metrics, outcome};
use chainwatch_common::retry::{Attempt, RetryError, RetryPolicy, retry};
use chainwatch_common::types::{Destination, Event, MonitoredAddress};
use chainwatch_engine::MessageFormatter;

use crate::NotificationSender;

/// Default attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// First backoff delay; doubles after each transient failure.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Longest wait between two attempts of the same task.
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Default number of destinations delivered to at once for one event.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// One (event, destination) delivery. Lives until it succeeds or fails terminally.
#[derive(Debug, Clone)]
pub struct NotificationTask {
    pub id: Uuid,
    pub event: Event,
    pub destination: Destination,
    pub attempt_count: u32,
}

impl NotificationTask {
    pub fn new(event: Event, destination: Destination) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            destination,
            attempt_count: 0,
        }
    }
}

/// Terminal state of a notification task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Every attempt failed transiently.
    FailedTransient { error: String },
    /// The destination rejected the message; not retried.
    FailedPermanent { error: String },
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent)
    }

    fn metric_label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => outcome::SENT,
            DeliveryOutcome::FailedTransient { .. } => outcome::FAILED_TRANSIENT,
            DeliveryOutcome::FailedPermanent { .. } => outcome::FAILED_PERMANENT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub destination: Destination,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

/// Fans events out to destinations and drives per-task retries.
///
/// Never returns an error: every task ends in a logged, counted outcome, and
/// one failing destination does not affect its siblings.
pub struct Dispatcher {
    sender: Arc<dyn NotificationSender>,
    policy: RetryPolicy,
    concurrency: usize,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn NotificationSender>, metrics: Metrics) -> Self {
        Self {
            sender,
            policy: RetryPolicy::exponential(DEFAULT_MAX_ATTEMPTS, BACKOFF_BASE, BACKOFF_MAX),
            concurrency: DEFAULT_CONCURRENCY,
            metrics,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy = RetryPolicy::exponential(max_attempts, BACKOFF_BASE, BACKOFF_MAX);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Deliver `event` to every destination of `address`.
    ///
    /// Returns once every destination has reached a terminal outcome. An
    /// address without destinations is reported as a misconfiguration and
    /// yields an empty report.
    pub async fn dispatch(&self, address: &MonitoredAddress, event: &Event) -> Vec<TaskReport> {
        if !address.is_deliverable() {
            tracing::warn!(
                address = %address.address,
                nickname = %address.nickname,
                event_id = %event.id,
                "No telegram destination for address and no default chat configured; event not delivered"
            );
            self.metrics.record_notification(outcome::UNDELIVERABLE);
            return Vec::new();
        }

        let text = MessageFormatter::render(address, event);
        let text = text.as_str();

        futures::stream::iter(address.destinations.iter().cloned())
            .map(|destination| {
                let task = NotificationTask::new(event.clone(), destination);
                self.deliver(task, text)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Deliver an already rendered report to each of `destinations`.
    ///
    /// Same retry and isolation rules as [`dispatch`](Self::dispatch); the
    /// `subject` only labels log lines.
    pub async fn send_report(
        &self,
        destinations: &[Destination],
        subject: &str,
        text: &str,
    ) -> Vec<TaskReport> {
        futures::stream::iter(destinations.iter().cloned())
            .map(|destination| async move {
                let task_id = Uuid::new_v4();
                let (attempts, outcome) = self.deliver_text(task_id, &destination, subject, text).await;
                TaskReport {
                    task_id,
                    destination,
                    attempts,
                    outcome,
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn deliver(&self, mut task: NotificationTask, text: &str) -> TaskReport {
        let (attempts, outcome) = self
            .deliver_text(task.id, &task.destination, &task.event.id, text)
            .await;
        task.attempt_count = attempts;

        TaskReport {
            task_id: task.id,
            destination: task.destination,
            attempts: task.attempt_count,
            outcome,
        }
    }

    /// Send `text` to one destination under the retry policy and record the
    /// terminal outcome.
    async fn deliver_text(
        &self,
        task_id: Uuid,
        destination: &Destination,
        subject: &str,
        text: &str,
    ) -> (u32, DeliveryOutcome) {
        let sender = &self.sender;

        let result = retry(&self.policy, |attempt| async move {
            match sender.send(destination, text).await {
                Attempt::Success(()) => Attempt::Success(attempt),
                Attempt::Transient { error, retry_after } => {
                    tracing::warn!(
                        task_id = %task_id,
                        chat_id = %destination.chat_id,
                        topic_id = ?destination.topic_id,
                        subject,
                        attempt,
                        retry_after_secs = retry_after.map(|d| d.as_secs()),
                        error = %error,
                        "Telegram delivery failed transiently"
                    );
                    Attempt::Transient { error, retry_after }
                }
                Attempt::Permanent(error) => Attempt::Permanent(error),
            }
        })
        .await;

        let (attempts, outcome) = match result {
            Ok(attempts) => (attempts, DeliveryOutcome::Sent),
            Err(RetryError::Exhausted { attempts, last }) => (
                attempts,
                DeliveryOutcome::FailedTransient {
                    error: last.to_string(),
                },
            ),
            Err(RetryError::Permanent { attempts, error }) => (
                attempts,
                DeliveryOutcome::FailedPermanent {
                    error: error.to_string(),
                },
            ),
        };

        match &outcome {
            DeliveryOutcome::Sent => tracing::info!(
                task_id = %task_id,
                chat_id = %destination.chat_id,
                topic_id = ?destination.topic_id,
                subject,
                attempts,
                "Notification sent"
            ),
            DeliveryOutcome::FailedTransient { error } | DeliveryOutcome::FailedPermanent { error } => {
                tracing::error!(
                    task_id = %task_id,
                    chat_id = %destination.chat_id,
                    topic_id = ?destination.topic_id,
                    subject,
                    attempts,
                    outcome = outcome.metric_label(),
                    error = %error,
                    "Notification failed terminally"
                )
            }
        }
        self.metrics.record_notification(outcome.metric_label());

        (attempts, outcome)
    }
}
