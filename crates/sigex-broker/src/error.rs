//! Broker error types.
//!
//! Failures are split into transient ones (network, timeouts, throttling,
//! 5xx) that are worth retrying, and business failures that are not.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by broker")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Order rejected by broker: {0}")]
    Rejected(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Order not found: {0}")]
    NotFound(String),
}

impl BrokerError {
    /// Worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// A cancel or modify refused because the order already reached a terminal state.
    #[must_use]
    pub fn is_already_terminal(&self) -> bool {
        let msg = match self {
            Self::Rejected(m) | Self::InvalidInput(m) => m,
            Self::Http { status, body } if (400..500).contains(status) => body,
            _ => return false,
        };
        let msg = msg.to_ascii_lowercase();
        (msg.contains("already") || msg.contains("cannot be cancelled"))
            && ["complete", "executed", "cancel", "reject", "filled"]
                .iter()
                .any(|s| msg.contains(s))
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
