//! Read-only market context consulted during admission.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::order::Direction;
use crate::Price;

/// Broad market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bullish,
    Bearish,
    Neutral,
}

impl Regime {
    /// Longs are blocked in a bearish regime, shorts in a bullish one.
    pub fn allows(&self, direction: Direction) -> bool {
        !matches!(
            (self, direction),
            (Self::Bearish, Direction::Long) | (Self::Bullish, Direction::Short)
        )
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Snapshot of market conditions for one evaluation.
///
/// Every field except `now` is optional. A check whose input is missing
/// is skipped rather than failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Evaluation time.
    pub now: DateTime<Utc>,
    #[serde(default)]
    pub regime: Option<Regime>,
    /// Volatility index level (e.g. India VIX).
    #[serde(default)]
    pub volatility_index: Option<Decimal>,
    /// Baseline volume used for spike confirmation.
    #[serde(default)]
    pub avg_volume: Option<Decimal>,
    #[serde(default)]
    pub support: Option<Price>,
    #[serde(default)]
    pub resistance: Option<Price>,
    #[serde(default)]
    pub day_high: Option<Price>,
    #[serde(default)]
    pub day_low: Option<Price>,
}

impl MarketContext {
    /// Context with only the evaluation time set.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            regime: None,
            volatility_index: None,
            avg_volume: None,
            support: None,
            resistance: None,
            day_high: None,
            day_low: None,
        }
    }

    #[must_use]
    pub fn with_regime(mut self, regime: Regime) -> Self {
        self.regime = Some(regime);
        self
    }

    #[must_use]
    pub fn with_volatility(mut self, vix: Decimal) -> Self {
        self.volatility_index = Some(vix);
        self
    }

    /// Day range (high minus low), when both are known.
    pub fn day_range(&self) -> Option<Decimal> {
        match (self.day_high, self.day_low) {
            (Some(h), Some(l)) => Some(h.inner() - l.inner()),
            _ => None,
        }
    }
}
