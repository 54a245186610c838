//! Execution-related types for the order lifecycle.
//!
//! This module provides:
//! - Admission verdicts and stable rejection codes
//! - Order legs and their state machine
//! - Bracket trades (entry + stop + target)
//! - Fill outcomes reported by order monitoring

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::order::{ClientOrderId, OrderKind, OrderSide};
use crate::signal::Signal;
use crate::Price;

// ============================================================================
// Admission
// ============================================================================

/// Stable reason code for a rejected signal.
///
/// Serialized in camelCase so downstream dashboards and the audit trail see
/// the same codes regardless of how the engine is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// Ledger paused after a loss or drawdown breach.
    TradingPaused,
    DailyLossLimit,
    WeeklyLossLimit,
    MonthlyLossLimit,
    /// Risk committed today would exceed the daily budget.
    DailyRiskLimit,
    DrawdownLimit,
    MaxTradesPerDay,
    ConsecutiveLosses,
    MaxOpenPositions,
    InstrumentCap,
    SectorCap,
    /// Too many signals inside the current minute bucket.
    SignalFlood,
    DailySignalCap,
    VolatilityThrottle,
    RrTooLow,
    SlInvalid,
    /// Entry too close to support/resistance against the trade.
    SrProximity,
    VolumeNotConfirmed,
    SpreadTooWide,
    LowLiquidity,
    RangeSpike,
    WickRejection,
    TimingBlocked,
    DuplicateWindow,
    CorrelationCooldown,
    StrategyCooldown,
    RegimeMismatch,
    MarginInsufficient,
    InvalidSignal,
    SignalExpired,
}

impl RejectReason {
    /// Stable wire code (e.g. `rrTooLow`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::TradingPaused => "tradingPaused",
            Self::DailyLossLimit => "dailyLossLimit",
            Self::WeeklyLossLimit => "weeklyLossLimit",
            Self::MonthlyLossLimit => "monthlyLossLimit",
            Self::DailyRiskLimit => "dailyRiskLimit",
            Self::DrawdownLimit => "drawdownLimit",
            Self::MaxTradesPerDay => "maxTradesPerDay",
            Self::ConsecutiveLosses => "consecutiveLosses",
            Self::MaxOpenPositions => "maxOpenPositions",
            Self::InstrumentCap => "instrumentCap",
            Self::SectorCap => "sectorCap",
            Self::SignalFlood => "signalFlood",
            Self::DailySignalCap => "dailySignalCap",
            Self::VolatilityThrottle => "volatilityThrottle",
            Self::RrTooLow => "rrTooLow",
            Self::SlInvalid => "slInvalid",
            Self::SrProximity => "srProximity",
            Self::VolumeNotConfirmed => "volumeNotConfirmed",
            Self::SpreadTooWide => "spreadTooWide",
            Self::LowLiquidity => "lowLiquidity",
            Self::RangeSpike => "rangeSpike",
            Self::WickRejection => "wickRejection",
            Self::TimingBlocked => "timingBlocked",
            Self::DuplicateWindow => "duplicateWindow",
            Self::CorrelationCooldown => "correlationCooldown",
            Self::StrategyCooldown => "strategyCooldown",
            Self::RegimeMismatch => "regimeMismatch",
            Self::MarginInsufficient => "marginInsufficient",
            Self::InvalidSignal => "invalidSignal",
            Self::SignalExpired => "signalExpired",
        }
    }

    /// Whether a later retry of the same signal can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MarginInsufficient)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of admission control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    Accepted,
    Rejected {
        reason: RejectReason,
        /// Human-readable detail for the audit trail.
        detail: String,
    },
}

impl Verdict {
    #[must_use]
    pub fn rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    #[must_use]
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }
}

// ============================================================================
// Order Legs
// ============================================================================

/// Role of a leg within a bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegRole {
    Entry,
    Stop,
    Target,
    /// Emergency market exit when the bracket could not be built.
    Flatten,
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "ENTRY"),
            Self::Stop => write!(f, "STOP"),
            Self::Target => write!(f, "TARGET"),
            Self::Flatten => write!(f, "FLATTEN"),
        }
    }
}

/// Broker-side status of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegStatus {
    /// Built locally, not yet acknowledged by the broker.
    #[default]
    Pending,
    Open,
    Complete,
    Rejected,
    Cancelled,
}

impl LegStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Rejected | Self::Cancelled)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Open)
    }
}

impl fmt::Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Open => write!(f, "OPEN"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// One broker order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLeg {
    /// Broker order id, assigned once the placement is acknowledged.
    pub id: Option<String>,
    /// Client tag sent with the order.
    pub tag: ClientOrderId,
    pub role: LegRole,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub kind: OrderKind,
    /// Limit price (LIMIT orders).
    pub price: Option<Price>,
    /// Trigger price (SL-M orders).
    pub trigger: Option<Price>,
    pub status: LegStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderLeg {
    /// Create a new leg in `Pending` state.
    #[must_use]
    pub fn new(
        role: LegRole,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: u32,
        kind: OrderKind,
    ) -> Self {
        Self {
            id: None,
            tag: ClientOrderId::new(),
            role,
            symbol: symbol.into(),
            side,
            quantity,
            kind,
            price: None,
            trigger: None,
            status: LegStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Entry leg for a sized signal.
    #[must_use]
    pub fn entry(signal: &Signal, kind: OrderKind) -> Self {
        let mut leg = Self::new(
            LegRole::Entry,
            &signal.symbol,
            signal.direction.entry_side(),
            signal.quantity,
            kind,
        );
        if kind == OrderKind::Limit {
            leg.price = Some(signal.entry);
        }
        leg
    }

    /// Stop-loss leg (SL-M triggered at the signal stop).
    #[must_use]
    pub fn stop(signal: &Signal) -> Self {
        let mut leg = Self::new(
            LegRole::Stop,
            &signal.symbol,
            signal.direction.exit_side(),
            signal.quantity,
            OrderKind::StopLossMarket,
        );
        leg.trigger = Some(signal.stop_loss);
        leg
    }

    /// Target leg (LIMIT at target1).
    #[must_use]
    pub fn target(signal: &Signal) -> Self {
        let mut leg = Self::new(
            LegRole::Target,
            &signal.symbol,
            signal.direction.exit_side(),
            signal.quantity,
            OrderKind::Limit,
        );
        leg.price = Some(signal.target1);
        leg
    }

    /// Market exit for the whole position.
    #[must_use]
    pub fn flatten(signal: &Signal) -> Self {
        Self::new(
            LegRole::Flatten,
            &signal.symbol,
            signal.direction.exit_side(),
            signal.quantity,
            OrderKind::Market,
        )
    }

    /// Broker acknowledged the order.
    pub fn mark_open(&mut self, order_id: String) {
        self.id = Some(order_id);
        self.status = LegStatus::Open;
    }

    /// Broker order id, or the empty string while pending.
    pub fn order_id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// Price the leg is expected to execute at, if known.
    pub fn reference_price(&self) -> Option<Price> {
        self.price.or(self.trigger)
    }
}

// ============================================================================
// Monitoring Outcomes
// ============================================================================

/// Result of watching a single order until a deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillOutcome {
    /// Order reached COMPLETE.
    Filled { average_price: Option<Price> },
    /// Order was rejected or cancelled by the broker.
    Rejected { reason: Option<String> },
    /// Deadline elapsed with the order still resting.
    Open,
}

impl FillOutcome {
    #[must_use]
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Filled { .. })
    }
}

// ============================================================================
// Bracket Trades
// ============================================================================

/// Unique bracket trade identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(String);

impl TradeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TradeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BracketStatus {
    #[default]
    Open,
    SlFilled,
    TargetFilled,
    TimedOut,
    /// Monitoring stopped because the trade was closed outside the engine.
    Cancelled,
}

impl BracketStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for BracketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::SlFilled => write!(f, "SL_FILLED"),
            Self::TargetFilled => write!(f, "TARGET_FILLED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Entry plus its two exit legs.
///
/// Only created once the entry leg is COMPLETE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketTrade {
    pub id: TradeId,
    /// Sized signal the trade was opened from.
    pub signal: Signal,
    pub entry: OrderLeg,
    pub stop: OrderLeg,
    pub target: OrderLeg,
    /// Actual entry fill price (falls back to the signal entry).
    pub entry_price: Price,
    pub status: BracketStatus,
    pub opened_at: DateTime<Utc>,
    pub exit_price: Option<Price>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl BracketTrade {
    #[must_use]
    pub fn open(
        signal: Signal,
        entry: OrderLeg,
        stop: OrderLeg,
        target: OrderLeg,
        entry_price: Price,
    ) -> Self {
        Self {
            id: TradeId::new(),
            signal,
            entry,
            stop,
            target,
            entry_price,
            status: BracketStatus::Open,
            opened_at: Utc::now(),
            exit_price: None,
            closed_at: None,
        }
    }

    /// Record the terminal status and exit price.
    pub fn close(&mut self, status: BracketStatus, exit_price: Option<Price>) {
        self.status = status;
        self.exit_price = exit_price.or_else(|| match status {
            BracketStatus::SlFilled => self.stop.reference_price(),
            BracketStatus::TargetFilled => self.target.reference_price(),
            _ => None,
        });
        self.closed_at = Some(Utc::now());
    }

    /// Realized PnL once a leg has filled.
    #[must_use]
    pub fn realized_pnl(&self) -> Option<Decimal> {
        let exit = self.exit_price?;
        if !matches!(
            self.status,
            BracketStatus::SlFilled | BracketStatus::TargetFilled
        ) {
            return None;
        }
        let per_unit = (exit.inner() - self.entry_price.inner())
            * Decimal::from(self.signal.direction.sign());
        Some(per_unit * Decimal::from(self.entry.quantity))
    }

    /// Risk that was committed when the trade opened.
    #[must_use]
    pub fn risk_taken(&self) -> Decimal {
        self.entry_price.distance_to(self.signal.stop_loss) * Decimal::from(self.entry.quantity)
    }
}
