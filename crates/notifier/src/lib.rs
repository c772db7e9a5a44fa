//! Notification delivery.
//!
//! The [`Dispatcher`] turns each new event into one task per destination and
//! delivers them independently through a [`NotificationSender`], retrying
//! transient failures with exponential backoff. [`TelegramBotApi`] is the
//! production sender.

pub mod dispatcher;
pub mod error;
pub mod telegram;

use async_trait::async_trait;

use chainwatch_common::retry::Attempt;
use chainwatch_common::types::Destination;

pub use dispatcher::{DeliveryOutcome, Dispatcher, NotificationTask, TaskReport};
pub use error::DeliveryError;
pub use telegram::TelegramBotApi;

/// Transport for a single delivery attempt.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, destination: &Destination, text: &str) -> Attempt<(), DeliveryError>;
}
