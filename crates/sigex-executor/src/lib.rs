//! Order execution for admitted signals.
//!
//! Turns a signal that passed the risk gate into a live bracket: entry leg,
//! stop-loss leg and target leg, with the losing exit cancelled once the
//! other fills.
//!
//! # Key Components
//!
//! - [`ExecutionEngine`]: end-to-end pipeline from signal to monitored bracket
//! - [`OrderExecutor`]: placement with transient-error retry, fill polling, cancels
//! - [`BracketMonitor`]: races the two exit legs of an open trade
//! - [`MarginPrecheck`] and [`PositionSizer`]: quantity from margin and risk budget
//! - [`RetryQueue`]: delayed re-offer of recoverable failures
//! - [`StaleOrderSweeper`]: cancels resting orders nobody is watching

pub mod bracket;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod margin;
pub mod open_trades;
pub mod order_executor;
pub mod retry;
pub mod sizer;
pub mod sweeper;

pub use bracket::{BracketMonitor, BracketOutcome, SiblingCancel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ExecutionConfig, RetryConfig, SizingConfig, SweeperConfig, TradingMode};
pub use context::{MarketContextProvider, StaticContextProvider};
pub use engine::{EngineSettings, ExecutionEngine, ExecutionOptions, ExecutionOutcome};
pub use error::{ExecutorError, ExecutorResult};
pub use margin::{affordable_quantity, Affordability, MarginPrecheck};
pub use open_trades::OpenTrades;
pub use order_executor::{CancelOutcome, OrderExecutor};
pub use retry::{RetryItem, RetryQueue};
pub use sizer::PositionSizer;
pub use sweeper::{OrderTracker, StaleOrderSweeper, TrackedOrder};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    use sigex_core::{AlgoMeta, Direction, Price, Signal, SignalId, StrategyCategory};

    use crate::config::ExecutionConfig;

    /// Wednesday 2024-06-12 10:30 IST.
    pub fn market_open() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 5, 0, 0).unwrap()
    }

    /// Long 10 @ 100, stop 95, target 118.
    pub fn signal(symbol: &str) -> Signal {
        Signal {
            id: SignalId::new(),
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry: Price::new(dec!(100)),
            stop_loss: Price::new(dec!(95)),
            target1: Price::new(dec!(118)),
            target2: None,
            quantity: 10,
            atr: Some(Price::new(dec!(5))),
            spread_pct: None,
            liquidity: None,
            volume: None,
            candle: None,
            sector: None,
            correlation_group: None,
            meta: AlgoMeta {
                strategy: "orb".to_string(),
                category: StrategyCategory::Breakout,
                win_rate: None,
            },
            confidence: 0.7,
            generated_at: market_open(),
            expires_at: None,
        }
    }

    /// Millisecond-scale timings so tests finish quickly.
    pub fn fast_config() -> ExecutionConfig {
        ExecutionConfig {
            place_backoff_ms: 1,
            poll_interval_ms: 5,
            entry_fill_timeout_secs: 1,
            bracket_deadline_secs: 2,
            margin_timeout_secs: 1,
            ..Default::default()
        }
    }
}
