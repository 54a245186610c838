//! Risk limits and admission gate thresholds.
//!
//! Numeric thresholds use zero to mean "check disabled" unless noted.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sigex_core::{AlgoMeta, StrategyCategory};

use crate::error::{RiskError, RiskResult};

/// Ledger-level circuit breaker limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Daily realized loss that pauses trading.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,
    #[serde(default = "default_max_weekly_loss")]
    pub max_weekly_loss: Decimal,
    #[serde(default = "default_max_monthly_loss")]
    pub max_monthly_loss: Decimal,
    /// Sum of stop-distance risk committed per day.
    #[serde(default = "default_max_daily_risk")]
    pub max_daily_risk: Decimal,
    /// Fractional drawdown from the equity peak that pauses trading (0.10 = 10%).
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_max_trades_per_instrument")]
    pub max_trades_per_instrument: u32,
    #[serde(default = "default_max_trades_per_sector")]
    pub max_trades_per_sector: u32,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,
    /// Equity the ledger starts from when no snapshot is restored.
    #[serde(default = "default_starting_equity")]
    pub starting_equity: Decimal,
}

fn default_max_daily_loss() -> Decimal {
    dec!(5000)
}

fn default_max_weekly_loss() -> Decimal {
    dec!(12000)
}

fn default_max_monthly_loss() -> Decimal {
    dec!(30000)
}

fn default_max_daily_risk() -> Decimal {
    dec!(10000)
}

fn default_max_drawdown() -> Decimal {
    dec!(0.10)
}

fn default_max_trades_per_day() -> u32 {
    10
}

fn default_max_trades_per_instrument() -> u32 {
    2
}

fn default_max_trades_per_sector() -> u32 {
    4
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_max_open_positions() -> u32 {
    5
}

fn default_starting_equity() -> Decimal {
    dec!(100000)
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss: default_max_daily_loss(),
            max_weekly_loss: default_max_weekly_loss(),
            max_monthly_loss: default_max_monthly_loss(),
            max_daily_risk: default_max_daily_risk(),
            max_drawdown: default_max_drawdown(),
            max_trades_per_day: default_max_trades_per_day(),
            max_trades_per_instrument: default_max_trades_per_instrument(),
            max_trades_per_sector: default_max_trades_per_sector(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_open_positions: default_max_open_positions(),
            starting_equity: default_starting_equity(),
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> RiskResult<()> {
        if self.max_daily_loss <= Decimal::ZERO {
            return Err(RiskError::ConfigError(
                "max_daily_loss must be positive".to_string(),
            ));
        }
        if self.max_drawdown <= Decimal::ZERO || self.max_drawdown >= Decimal::ONE {
            return Err(RiskError::ConfigError(format!(
                "max_drawdown must be in (0, 1), got {}",
                self.max_drawdown
            )));
        }
        if self.starting_equity <= Decimal::ZERO {
            return Err(RiskError::ConfigError(
                "starting_equity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Minimum reward/risk by strategy family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinRrTable {
    pub trend_following: Decimal,
    pub breakout: Decimal,
    pub mean_reversion: Decimal,
    /// Applies to scalping/fade once the win-rate condition holds.
    pub scalping: Decimal,
    /// Scalping/fade strategies need a win rate above this to trade at all.
    pub scalping_min_win_rate: f64,
    /// Any other category.
    pub default: Decimal,
}

impl Default for MinRrTable {
    fn default() -> Self {
        Self {
            trend_following: dec!(2.0),
            breakout: dec!(1.8),
            mean_reversion: dec!(1.5),
            scalping: dec!(1.0),
            scalping_min_win_rate: 0.65,
            default: dec!(1.5),
        }
    }
}

impl MinRrTable {
    /// Minimum reward/risk for a strategy. `None` means no ratio is good enough.
    pub fn min_rr(&self, meta: &AlgoMeta) -> Option<Decimal> {
        match meta.category {
            StrategyCategory::TrendFollowing => Some(self.trend_following),
            StrategyCategory::Breakout => Some(self.breakout),
            StrategyCategory::MeanReversion => Some(self.mean_reversion),
            StrategyCategory::Scalping | StrategyCategory::Fade => meta
                .win_rate
                .filter(|wr| *wr > self.scalping_min_win_rate)
                .map(|_| self.scalping),
            StrategyCategory::Other => Some(self.default),
        }
    }
}

/// Admission gate thresholds and window lengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Same (symbol, direction, strategy) suppressed for this long.
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
    /// Same correlation group suppressed for this long.
    #[serde(default = "default_correlation_window_secs")]
    pub correlation_window_secs: u64,
    /// Strategy blocked for this long after a loss or failed placement.
    #[serde(default = "default_strategy_cooldown_secs")]
    pub strategy_cooldown_secs: u64,
    #[serde(default = "default_max_signals_per_minute")]
    pub max_signals_per_minute: u32,
    #[serde(default = "default_max_signals_per_day")]
    pub max_signals_per_day: u32,
    /// Volatility index level above which re-entry is throttled.
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: Decimal,
    /// Re-entry interval per symbol while volatility is above threshold.
    #[serde(default = "default_volatility_throttle_secs")]
    pub volatility_throttle_secs: u64,
    #[serde(default)]
    pub min_rr: MinRrTable,
    /// Stop distance must exceed this multiple of ATR (noise floor).
    #[serde(default = "default_sl_noise_atr")]
    pub sl_noise_atr: Decimal,
    /// Stop distance band, as ATR multiples.
    #[serde(default = "default_sl_min_atr")]
    pub sl_min_atr: Decimal,
    #[serde(default = "default_sl_max_atr")]
    pub sl_max_atr: Decimal,
    /// Minimum room (percent of entry) to the nearest opposing S/R level.
    #[serde(default = "default_min_sr_distance_pct")]
    pub min_sr_distance_pct: Decimal,
    /// Breakout bar volume must reach this multiple of average volume.
    #[serde(default = "default_breakout_volume_multiple")]
    pub breakout_volume_multiple: Decimal,
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: Decimal,
    #[serde(default)]
    pub min_liquidity: Decimal,
    /// Day range larger than this multiple of ATR is treated as a spike.
    #[serde(default = "default_max_range_atr")]
    pub max_range_atr: Decimal,
    /// Adverse wick as a fraction of the bar range.
    #[serde(default = "default_max_wick_ratio")]
    pub max_wick_ratio: Decimal,
    /// Reject trades against the supplied regime.
    #[serde(default = "default_enforce_regime")]
    pub enforce_regime: bool,
}

fn default_duplicate_window_secs() -> u64 {
    300
}

fn default_correlation_window_secs() -> u64 {
    900
}

fn default_strategy_cooldown_secs() -> u64 {
    1800
}

fn default_max_signals_per_minute() -> u32 {
    10
}

fn default_max_signals_per_day() -> u32 {
    200
}

fn default_volatility_threshold() -> Decimal {
    dec!(25)
}

fn default_volatility_throttle_secs() -> u64 {
    600
}

fn default_sl_noise_atr() -> Decimal {
    dec!(0.2)
}

fn default_sl_min_atr() -> Decimal {
    dec!(0.5)
}

fn default_sl_max_atr() -> Decimal {
    dec!(3.0)
}

fn default_min_sr_distance_pct() -> Decimal {
    dec!(0.3)
}

fn default_breakout_volume_multiple() -> Decimal {
    dec!(1.5)
}

fn default_max_spread_pct() -> Decimal {
    dec!(0.5)
}

fn default_max_range_atr() -> Decimal {
    dec!(4)
}

fn default_max_wick_ratio() -> Decimal {
    dec!(0.6)
}

fn default_enforce_regime() -> bool {
    true
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            duplicate_window_secs: default_duplicate_window_secs(),
            correlation_window_secs: default_correlation_window_secs(),
            strategy_cooldown_secs: default_strategy_cooldown_secs(),
            max_signals_per_minute: default_max_signals_per_minute(),
            max_signals_per_day: default_max_signals_per_day(),
            volatility_threshold: default_volatility_threshold(),
            volatility_throttle_secs: default_volatility_throttle_secs(),
            min_rr: MinRrTable::default(),
            sl_noise_atr: default_sl_noise_atr(),
            sl_min_atr: default_sl_min_atr(),
            sl_max_atr: default_sl_max_atr(),
            min_sr_distance_pct: default_min_sr_distance_pct(),
            breakout_volume_multiple: default_breakout_volume_multiple(),
            max_spread_pct: default_max_spread_pct(),
            min_liquidity: Decimal::ZERO,
            max_range_atr: default_max_range_atr(),
            max_wick_ratio: default_max_wick_ratio(),
            enforce_regime: default_enforce_regime(),
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.sl_min_atr > Decimal::ZERO
            && self.sl_max_atr > Decimal::ZERO
            && self.sl_min_atr >= self.sl_max_atr
        {
            return Err(RiskError::ConfigError(format!(
                "sl_min_atr {} must be below sl_max_atr {}",
                self.sl_min_atr, self.sl_max_atr
            )));
        }
        if self.duplicate_window_secs == 0 {
            return Err(RiskError::ConfigError(
                "duplicate_window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(category: StrategyCategory, win_rate: Option<f64>) -> AlgoMeta {
        AlgoMeta {
            strategy: "s".to_string(),
            category,
            win_rate,
        }
    }

    #[test]
    fn test_min_rr_by_category() {
        let table = MinRrTable::default();
        assert_eq!(
            table.min_rr(&meta(StrategyCategory::TrendFollowing, None)),
            Some(dec!(2.0))
        );
        assert_eq!(
            table.min_rr(&meta(StrategyCategory::Breakout, None)),
            Some(dec!(1.8))
        );
        assert_eq!(
            table.min_rr(&meta(StrategyCategory::MeanReversion, None)),
            Some(dec!(1.5))
        );
    }

    #[test]
    fn test_scalping_needs_win_rate() {
        let table = MinRrTable::default();
        assert_eq!(table.min_rr(&meta(StrategyCategory::Scalping, None)), None);
        assert_eq!(
            table.min_rr(&meta(StrategyCategory::Fade, Some(0.60))),
            None
        );
        assert_eq!(
            table.min_rr(&meta(StrategyCategory::Scalping, Some(0.70))),
            Some(dec!(1.0))
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RiskLimits::default().validate().is_ok());
        assert!(GateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_atr_band_rejected() {
        let config = GateConfig {
            sl_min_atr: dec!(3),
            sl_max_atr: dec!(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let limits: RiskLimits = serde_json::from_str(r#"{"max_daily_loss": "2500"}"#).unwrap();
        assert_eq!(limits.max_daily_loss, dec!(2500));
        assert_eq!(limits.max_trades_per_day, 10);
    }
}
