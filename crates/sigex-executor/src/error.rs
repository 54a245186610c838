//! Executor error types.

use sigex_broker::BrokerError;
use sigex_core::LegRole;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("{role} placement failed after {attempts} attempt(s): {source}")]
    PlacementFailed {
        role: LegRole,
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ExecutorError {
    /// Whether retrying the same work later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PlacementFailed { source, .. } | Self::Broker(source) => source.is_transient(),
            Self::Timeout(_) => true,
            Self::ConfigError(_) => false,
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
