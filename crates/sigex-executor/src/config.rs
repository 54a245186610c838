//! Execution, sizing, retry and sweeper settings.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sigex_core::OrderKind;

use crate::error::{ExecutorError, ExecutorResult};

/// Whether orders reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Live,
    /// Admission and sizing only.
    Paper,
}

/// Order placement and monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: TradingMode,
    /// LIMIT at the signal entry, or MARKET.
    #[serde(default = "default_entry_order_kind")]
    pub entry_order_kind: OrderKind,
    /// Broker-call retries for transient placement failures.
    #[serde(default = "default_place_retries")]
    pub place_retries: u32,
    /// Base of the `delay × 2^attempt` placement backoff.
    #[serde(default = "default_place_backoff_ms")]
    pub place_backoff_ms: u64,
    #[serde(default = "default_entry_fill_timeout_secs")]
    pub entry_fill_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Brackets still unresolved after this long are marked timed out and
    /// polled at `reconcile_interval_ms` until a leg fills.
    #[serde(default = "default_bracket_deadline_secs")]
    pub bracket_deadline_secs: u64,
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// Sample quantity for the per-unit margin lookup.
    #[serde(default = "default_margin_sample_qty")]
    pub margin_sample_qty: u32,
    #[serde(default = "default_margin_timeout_secs")]
    pub margin_timeout_secs: u64,
}

fn default_entry_order_kind() -> OrderKind {
    OrderKind::Limit
}

fn default_place_retries() -> u32 {
    3
}

fn default_place_backoff_ms() -> u64 {
    500
}

fn default_entry_fill_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_bracket_deadline_secs() -> u64 {
    // 09:15 to 15:30
    6 * 60 * 60 + 15 * 60
}

fn default_reconcile_interval_ms() -> u64 {
    30_000
}

fn default_margin_sample_qty() -> u32 {
    1
}

fn default_margin_timeout_secs() -> u64 {
    5
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::default(),
            entry_order_kind: default_entry_order_kind(),
            place_retries: default_place_retries(),
            place_backoff_ms: default_place_backoff_ms(),
            entry_fill_timeout_secs: default_entry_fill_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            bracket_deadline_secs: default_bracket_deadline_secs(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            margin_sample_qty: default_margin_sample_qty(),
            margin_timeout_secs: default_margin_timeout_secs(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.poll_interval_ms == 0 || self.reconcile_interval_ms == 0 {
            return Err(ExecutorError::ConfigError(
                "poll and reconcile intervals must be > 0".to_string(),
            ));
        }
        if self.entry_fill_timeout_secs == 0 || self.bracket_deadline_secs == 0 {
            return Err(ExecutorError::ConfigError(
                "fill and bracket deadlines must be > 0".to_string(),
            ));
        }
        if self.margin_sample_qty == 0 {
            return Err(ExecutorError::ConfigError(
                "margin_sample_qty must be > 0".to_string(),
            ));
        }
        if self.entry_order_kind == OrderKind::StopLossMarket {
            return Err(ExecutorError::ConfigError(
                "entry_order_kind must be LIMIT or MARKET".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_paper(&self) -> bool {
        self.mode == TradingMode::Paper
    }

    pub fn place_backoff(&self) -> Duration {
        Duration::from_millis(self.place_backoff_ms)
    }

    pub fn entry_fill_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_fill_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bracket_deadline(&self) -> Duration {
        Duration::from_secs(self.bracket_deadline_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn margin_timeout(&self) -> Duration {
        Duration::from_secs(self.margin_timeout_secs)
    }
}

/// Position sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Currency risked per trade (stop distance × quantity).
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: Decimal,
    /// Share of affordable quantity actually used (1.0 = all of it).
    #[serde(default = "default_margin_utilisation")]
    pub margin_utilisation: Decimal,
    /// Hard quantity ceiling. Zero disables.
    #[serde(default)]
    pub max_quantity: u32,
}

fn default_risk_per_trade() -> Decimal {
    dec!(1000)
}

fn default_margin_utilisation() -> Decimal {
    Decimal::ONE
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: default_risk_per_trade(),
            margin_utilisation: default_margin_utilisation(),
            max_quantity: 0,
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.risk_per_trade <= Decimal::ZERO {
            return Err(ExecutorError::ConfigError(
                "risk_per_trade must be > 0".to_string(),
            ));
        }
        if self.margin_utilisation <= Decimal::ZERO || self.margin_utilisation > Decimal::ONE {
            return Err(ExecutorError::ConfigError(
                "margin_utilisation must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry queue policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First retry waits this long; each failure doubles it.
    #[serde(default = "default_retry_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_retry_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_retry_base_delay_secs() -> u64 {
    60
}

fn default_retry_sweep_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_queue_size() -> usize {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_retry_base_delay_secs(),
            sweep_interval_secs: default_retry_sweep_interval_secs(),
            max_attempts: default_max_attempts(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.base_delay_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(ExecutorError::ConfigError(
                "retry delays must be > 0".to_string(),
            ));
        }
        if self.max_attempts == 0 || self.max_queue_size == 0 {
            return Err(ExecutorError::ConfigError(
                "max_attempts and max_queue_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Stale resting-order sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Tracked orders older than this are cancelled.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_age_secs() -> u64 {
    15 * 60
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl SweeperConfig {
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.interval_secs == 0 || self.max_age_secs == 0 {
            return Err(ExecutorError::ConfigError(
                "sweeper interval and max age must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
