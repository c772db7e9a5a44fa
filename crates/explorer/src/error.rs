use thiserror::Error;

/// Failure of a single explorer request.
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Explorer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Explorer rate limited the request")]
    RateLimited,

    #[error("Malformed explorer response: {0}")]
    Malformed(String),
}
