//! Trade candidates produced by the strategy layer.
//!
//! A [`Signal`] is immutable once produced. The engine only ever derives a
//! copy with a final quantity attached (see [`Signal::with_quantity`]).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::order::Direction;
use crate::Price;

/// Unique signal identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(String);

impl SignalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SignalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad family a strategy belongs to. Drives the minimum reward/risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyCategory {
    TrendFollowing,
    Breakout,
    MeanReversion,
    Scalping,
    Fade,
    #[serde(other)]
    Other,
}

impl fmt::Display for StrategyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TrendFollowing => "trend_following",
            Self::Breakout => "breakout",
            Self::MeanReversion => "mean_reversion",
            Self::Scalping => "scalping",
            Self::Fade => "fade",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Strategy metadata carried by every signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgoMeta {
    /// Strategy name (e.g. "orb_breakout").
    pub strategy: String,
    /// Strategy family.
    pub category: StrategyCategory,
    /// Historical win rate in [0, 1], when known.
    #[serde(default)]
    pub win_rate: Option<f64>,
}

/// OHLC shape of the bar that produced the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

impl Candle {
    /// High minus low.
    pub fn range(&self) -> Decimal {
        self.high.inner() - self.low.inner()
    }

    /// Distance from the top of the body to the high.
    pub fn upper_wick(&self) -> Decimal {
        self.high.inner() - self.open.inner().max(self.close.inner())
    }

    /// Distance from the bottom of the body to the low.
    pub fn lower_wick(&self) -> Decimal {
        self.open.inner().min(self.close.inner()) - self.low.inner()
    }
}

/// Immutable trade candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default)]
    pub id: SignalId,
    /// Exchange trading symbol.
    pub symbol: String,
    pub direction: Direction,
    pub entry: Price,
    pub stop_loss: Price,
    pub target1: Price,
    #[serde(default)]
    pub target2: Option<Price>,
    /// Requested quantity. Zero means the sizer decides.
    #[serde(default)]
    pub quantity: u32,
    /// Average true range at signal time.
    #[serde(default)]
    pub atr: Option<Price>,
    /// Bid/ask spread as a percentage of price.
    #[serde(default)]
    pub spread_pct: Option<Decimal>,
    /// Average traded value, used as a liquidity proxy.
    #[serde(default)]
    pub liquidity: Option<Decimal>,
    /// Volume of the signal bar.
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub candle: Option<Candle>,
    #[serde(default)]
    pub sector: Option<String>,
    /// Explicit correlation tag. Falls back to `sector` when absent.
    #[serde(default)]
    pub correlation_group: Option<String>,
    pub meta: AlgoMeta,
    #[serde(default)]
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Signal {
    /// Per-unit risk: distance from entry to stop.
    pub fn risk_per_unit(&self) -> Decimal {
        self.entry.distance_to(self.stop_loss)
    }

    /// Per-unit reward: distance from entry to the first target.
    pub fn reward_per_unit(&self) -> Decimal {
        self.entry.distance_to(self.target1)
    }

    /// Reward/risk ratio against target1. `None` when risk is zero.
    pub fn risk_reward(&self) -> Option<Decimal> {
        let risk = self.risk_per_unit();
        if risk.is_zero() {
            return None;
        }
        Some(self.reward_per_unit() / risk)
    }

    /// Currency amount at risk for `quantity` units.
    pub fn risk_amount(&self, quantity: u32) -> Decimal {
        self.risk_per_unit() * Decimal::from(quantity)
    }

    /// Stop sits on the losing side of entry and target on the winning side.
    pub fn has_consistent_levels(&self) -> bool {
        if !self.entry.is_positive() || !self.stop_loss.is_positive() || !self.target1.is_positive()
        {
            return false;
        }
        match self.direction {
            Direction::Long => self.stop_loss < self.entry && self.target1 > self.entry,
            Direction::Short => self.stop_loss > self.entry && self.target1 < self.entry,
        }
    }

    /// Key for duplicate suppression: `(symbol, direction, strategy)`.
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}:{}", self.symbol, self.direction, self.meta.strategy)
    }

    /// Key for correlated-exposure suppression, if any.
    pub fn correlation_key(&self) -> Option<&str> {
        self.correlation_group
            .as_deref()
            .or(self.sector.as_deref())
    }

    /// Sector used for per-sector caps.
    pub fn sector_or_unknown(&self) -> &str {
        self.sector.as_deref().unwrap_or("UNKNOWN")
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Copy of this signal with the final quantity attached.
    #[must_use]
    pub fn with_quantity(&self, quantity: u32) -> Self {
        Self {
            quantity,
            ..self.clone()
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn breakout_long(entry: Decimal, stop: Decimal, target: Decimal) -> Signal {
        Signal {
            id: SignalId::new(),
            symbol: "INFY".to_string(),
            direction: Direction::Long,
            entry: Price::new(entry),
            stop_loss: Price::new(stop),
            target1: Price::new(target),
            target2: None,
            quantity: 10,
            atr: Some(Price::new(dec!(5))),
            spread_pct: None,
            liquidity: None,
            volume: None,
            candle: None,
            sector: Some("IT".to_string()),
            correlation_group: None,
            meta: AlgoMeta {
                strategy: "orb_breakout".to_string(),
                category: StrategyCategory::Breakout,
                win_rate: None,
            },
            confidence: 0.7,
            generated_at: Utc::now(),
            expires_at: None,
        }
    }
}
