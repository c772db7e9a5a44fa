use thiserror::Error;

/// Failure of a single delivery attempt.
///
/// Whether it is retried is decided by the sender when it wraps the error in
/// an `Attempt`.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API returned {status}: {description}")]
    Api { status: u16, description: String },

    #[error("Telegram rate limited the bot")]
    RateLimited,

    #[error("Delivery failed: {0}")]
    Other(String),
}
