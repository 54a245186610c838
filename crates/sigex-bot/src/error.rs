//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Core error: {0}")]
    Core(#[from] sigex_core::CoreError),

    #[error("Risk error: {0}")]
    Risk(#[from] sigex_risk::RiskError),

    #[error("Broker error: {0}")]
    Broker(#[from] sigex_broker::BrokerError),

    #[error("Executor error: {0}")]
    Executor(#[from] sigex_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sigex_telemetry::TelemetryError),

    #[error("Invalid signal: {0}")]
    Signal(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
