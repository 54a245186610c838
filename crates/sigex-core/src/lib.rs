//! Core domain types for the sigex execution engine.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`: precision-safe price type
//! - `Signal`, `AlgoMeta`: immutable trade candidates
//! - `OrderLeg`, `BracketTrade`: broker orders and their grouping
//! - `RejectReason`, `Verdict`: admission results
//! - `MarketContext`, `SessionCalendar`: read-only market inputs

pub mod calendar;
pub mod decimal;
pub mod error;
pub mod execution;
pub mod market;
pub mod order;
pub mod signal;

pub use calendar::{BlackoutWindow, CalendarConfig, PeriodKey, SessionCalendar, TimingBlock};
pub use decimal::Price;
pub use error::{CoreError, Result};
pub use market::{MarketContext, Regime};
pub use order::{ClientOrderId, Direction, OrderKind, OrderSide};
pub use signal::{AlgoMeta, Candle, Signal, SignalId, StrategyCategory};

// Execution types
pub use execution::{
    BracketStatus, BracketTrade, FillOutcome, LegRole, LegStatus, OrderLeg, RejectReason,
    TradeId, Verdict,
};
