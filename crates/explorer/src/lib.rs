pub mod analyzer;
pub mod client;
pub mod error;
pub mod retrying;
pub mod wire;


use std::time::Duration;

use async_trait::async_trait;

use chainwatch_common::retry::Attempt;
use chainwatch_common::types::{AddressBalance, Event};

pub use client::HttpExplorerClient;
pub use error::ExplorerError;
pub use retrying::Explorer;

/// A single-attempt source of on-chain events.
///
/// Implementations classify each call as success, transient or permanent
/// failure; [`Explorer`] layers the configured retry policy on top.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events for `address` no older than `lookback`, ordered oldest-first.
    async fn fetch(&self, address: &str, lookback: Duration) -> Attempt<Vec<Event>, ExplorerError>;

    /// Confirmed balance of `address`.
    async fn balance(&self, address: &str) -> Attempt<AddressBalance, ExplorerError>;

    /// Cheap reachability check used at startup.
    async fn probe(&self) -> Attempt<(), ExplorerError>;
}
