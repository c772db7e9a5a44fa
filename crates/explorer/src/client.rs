use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;

use chainwatch_common::retry::Attempt;
use chainwatch_common::types::{AddressBalance, Event, TokenBalance};

use crate::EventSource;
use crate::analyzer::TransactionAnalyzer;
use crate::error::ExplorerError;
use crate::wire::{BalanceResponse, TransactionsPage};

/// Transactions requested per page.
const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound on pages walked per fetch, so a busy address cannot turn one
/// check into an unbounded crawl even inside the lookback window.
const DEFAULT_MAX_PAGES: u32 = 20;

/// Minimum spacing between consecutive explorer requests.
const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Longest `Retry-After` honored from a rate-limit response.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// HTTP client for the explorer's address transaction listing.
pub struct HttpExplorerClient {
    base_url: String,
    http: reqwest::Client,
    page_size: u32,
    max_pages: u32,
    min_request_interval: Duration,
    /// When the last request was sent; shared by every caller of this client.
    last_request: Mutex<Option<Instant>>,
}

impl HttpExplorerClient {
    /// Create a client for `base_url` whose requests time out after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExplorerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chainwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            last_request: Mutex::new(None),
        })
    }

    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    pub fn with_paging(mut self, page_size: u32, max_pages: u32) -> Self {
        self.page_size = page_size.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    /// Wait until `min_request_interval` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_request_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Attempt<T, ExplorerError> {
        self.throttle().await;

        let response = match self.http.get(url).query(query).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Attempt::Permanent(ExplorerError::Http(e)),
            Err(e) => return Attempt::transient(ExplorerError::Http(e)),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .map(|wait| wait.min(MAX_RETRY_AFTER));
            return Attempt::Transient {
                error: ExplorerError::RateLimited,
                retry_after,
            };
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = ExplorerError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            };
            return if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
                Attempt::transient(error)
            } else {
                Attempt::Permanent(error)
            };
        }

        match response.bytes().await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Attempt::Success(value),
                Err(e) => Attempt::Permanent(ExplorerError::Malformed(e.to_string())),
            },
            // Connection dropped mid-body.
            Err(e) => Attempt::transient(ExplorerError::Http(e)),
        }
    }
}

#[async_trait]
impl EventSource for HttpExplorerClient {
    async fn fetch(&self, address: &str, lookback: Duration) -> Attempt<Vec<Event>, ExplorerError> {
        let window_start_ms = chrono::Duration::from_std(lookback)
            .ok()
            .and_then(|lookback| Utc::now().checked_sub_signed(lookback))
            .map(|start| start.timestamp_millis())
            .unwrap_or(i64::MIN);
        let url = format!("{}/addresses/{}/transactions", self.base_url, address);

        // The explorer lists newest first.
        let mut newest_first = Vec::new();
        let mut offset: u64 = 0;

        for page_number in 0..self.max_pages {
            let query = [
                ("offset", offset.to_string()),
                ("limit", self.page_size.to_string()),
                ("sortDirection", "desc".to_string()),
            ];
            let page: TransactionsPage = match self.get_json(&url, &query).await {
                Attempt::Success(page) => page,
                Attempt::Transient { error, retry_after } => {
                    return Attempt::Transient { error, retry_after };
                }
                Attempt::Permanent(error) => return Attempt::Permanent(error),
            };

            let page_len = page.items.len() as u64;
            let mut reached_window_start = false;

            for tx in &page.items {
                if tx.timestamp < window_start_ms {
                    reached_window_start = true;
                    continue;
                }
                if let Some(event) = TransactionAnalyzer::to_event(tx, address) {
                    newest_first.push(event);
                }
            }

            offset += page_len;
            let exhausted = page_len < self.page_size as u64 || (page.total > 0 && offset >= page.total);
            if reached_window_start || exhausted {
                break;
            }
            if page_number + 1 == self.max_pages {
                tracing::warn!(
                    address,
                    pages = self.max_pages,
                    "Page limit reached before the lookback window start"
                );
            }
        }

        newest_first.reverse();
        Attempt::Success(newest_first)
    }

    async fn balance(&self, address: &str) -> Attempt<AddressBalance, ExplorerError> {
        let url = format!("{}/addresses/{}/balance/confirmed", self.base_url, address);
        match self.get_json::<BalanceResponse>(&url, &[]).await {
            Attempt::Success(balance) => Attempt::Success(AddressBalance {
                nano_ergs: balance.nano_ergs,
                tokens: balance
                    .tokens
                    .into_iter()
                    .map(|t| TokenBalance {
                        token_id: t.token_id,
                        name: t.name.filter(|n| !n.is_empty()),
                        decimals: t.decimals,
                        amount: t.amount,
                    })
                    .collect(),
            }),
            Attempt::Transient { error, retry_after } => Attempt::Transient { error, retry_after },
            Attempt::Permanent(error) => Attempt::Permanent(error),
        }
    }

    async fn probe(&self) -> Attempt<(), ExplorerError> {
        let url = format!("{}/info", self.base_url);
        match self.get_json::<serde_json::Value>(&url, &[]).await {
            Attempt::Success(_) => Attempt::Success(()),
            Attempt::Transient { error, retry_after } => Attempt::Transient { error, retry_after },
            Attempt::Permanent(error) => Attempt::Permanent(error),
        }
    }
}
