//! Admission gate.
//!
//! Every candidate signal passes through an ordered pipeline of checks.
//! The first failing check determines the rejection code; the outcome
//! (accept or reject) does not depend on the order.
//!
//! # Check order
//!
//! 0. Validity: consistent levels, not expired
//! 1. Circuit breakers: pause, loss ceilings, drawdown, daily risk,
//!    trades/day, loss streak, open positions, instrument and sector caps
//! 2. Flood control: per-minute bucket, daily cap, volatility throttle
//! 3. Trade quality: reward/risk, stop vs ATR, S/R room, breakout volume,
//!    spread, liquidity, range spike, adverse wick
//! 4. Timing: exchange calendar
//! 5. Conflicts: duplicate window, correlation cooldown, strategy cooldown
//! 6. Regime alignment
//!
//! The ledger lock is held for the whole evaluation so that the checks and
//! the acceptance bookkeeping are one atomic step.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use sigex_core::{
    Direction, MarketContext, RejectReason, SessionCalendar, Signal, StrategyCategory, Verdict,
};
use sigex_telemetry::Metrics;

use crate::audit::AuditSink;
use crate::config::GateConfig;
use crate::ledger::{LedgerHandle, RiskLedger};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Risk reserved for a signal that arrives without a quantity.
const DEFAULT_UNSIZED_TRADE_RISK: Decimal = Decimal::ONE_THOUSAND;

/// A failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rejection {
    gate: &'static str,
    reason: RejectReason,
    detail: String,
}

type Check = Result<(), Rejection>;

fn reject(gate: &'static str, reason: RejectReason, detail: impl Into<String>) -> Check {
    let detail = detail.into();
    trace!(gate, reason = reason.code(), %detail, "check failed");
    Err(Rejection {
        gate,
        reason,
        detail,
    })
}

/// Stateful admission control over a shared [`LedgerHandle`].
pub struct AdmissionGate {
    config: GateConfig,
    calendar: Arc<SessionCalendar>,
    ledger: LedgerHandle,
    audit: Arc<dyn AuditSink>,
    unsized_trade_risk: Decimal,
}

impl AdmissionGate {
    pub fn new(
        config: GateConfig,
        calendar: Arc<SessionCalendar>,
        ledger: LedgerHandle,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            calendar,
            ledger,
            audit,
            unsized_trade_risk: DEFAULT_UNSIZED_TRADE_RISK,
        }
    }

    /// Risk to reserve for unsized signals. Should match the sizer's per-trade budget.
    #[must_use]
    pub fn with_unsized_trade_risk(mut self, risk: Decimal) -> Self {
        self.unsized_trade_risk = risk;
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    /// Decide whether `signal` may proceed. Accepted signals consume ledger capacity.
    pub fn evaluate(&self, signal: &Signal, ctx: &MarketContext) -> Verdict {
        let now = ctx.now;
        let mut ledger = self.ledger.lock();
        ledger.reset_if_period_rolled(now);

        match self.run_checks(signal, ctx, &ledger) {
            Ok(()) => {
                let mut risk = self.planned_risk(signal);
                if let Some(headroom) = ledger.risk_headroom() {
                    risk = risk.min(headroom);
                }
                ledger.record_admission(signal, now, self.is_high_volatility(ctx), risk);
                drop(ledger);
                Metrics::signal_accepted();
                debug!(
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    strategy = %signal.meta.strategy,
                    "Signal admitted"
                );
                Verdict::Accepted
            }
            Err(rejection) => {
                let stats = ledger.stats();
                drop(ledger);
                warn!(
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    gate = rejection.gate,
                    reason = rejection.reason.code(),
                    detail = %rejection.detail,
                    ledger = %stats,
                    "Signal rejected"
                );
                self.audit
                    .record_rejection(&signal.id, rejection.reason, &rejection.detail);
                Metrics::signal_rejected(rejection.reason.code());
                Verdict::rejected(rejection.reason, rejection.detail)
            }
        }
    }

    fn run_checks(&self, signal: &Signal, ctx: &MarketContext, ledger: &RiskLedger) -> Check {
        self.check_validity(signal, ctx.now)?;
        self.check_circuit_breakers(signal, ledger)?;
        self.check_flood(signal, ctx, ledger)?;
        self.check_quality(signal, ctx)?;
        self.check_timing(signal, ctx.now)?;
        self.check_conflicts(signal, ctx.now, ledger)?;
        self.check_regime(signal, ctx)
    }

    /// Risk the trade is expected to commit once sized.
    fn planned_risk(&self, signal: &Signal) -> Decimal {
        if signal.quantity > 0 {
            signal.risk_amount(signal.quantity)
        } else {
            self.unsized_trade_risk
        }
    }

    fn is_high_volatility(&self, ctx: &MarketContext) -> bool {
        self.config.volatility_threshold > Decimal::ZERO
            && ctx
                .volatility_index
                .is_some_and(|v| v > self.config.volatility_threshold)
    }

    // ------------------------------------------------------------------
    // 0. Validity
    // ------------------------------------------------------------------

    fn check_validity(&self, signal: &Signal, now: DateTime<Utc>) -> Check {
        if signal.symbol.trim().is_empty() {
            return reject("validity", RejectReason::InvalidSignal, "empty symbol");
        }
        if !signal.has_consistent_levels() {
            return reject(
                "validity",
                RejectReason::InvalidSignal,
                format!(
                    "inconsistent levels for {}: entry {} stop {} target {}",
                    signal.direction, signal.entry, signal.stop_loss, signal.target1
                ),
            );
        }
        if signal.is_expired(now) {
            return reject("validity", RejectReason::SignalExpired, "signal expired");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 1. Circuit breakers
    // ------------------------------------------------------------------

    fn check_circuit_breakers(&self, signal: &Signal, ledger: &RiskLedger) -> Check {
        const GATE: &str = "circuit_breaker";
        let limits = ledger.limits();

        if ledger.is_paused() {
            let why = ledger
                .pause_reason()
                .map(|r| r.to_string())
                .unwrap_or_default();
            return reject(GATE, RejectReason::TradingPaused, why);
        }
        if at_limit(ledger.daily_loss(), limits.max_daily_loss) {
            return reject(
                GATE,
                RejectReason::DailyLossLimit,
                format!("daily loss {} >= {}", ledger.daily_loss(), limits.max_daily_loss),
            );
        }
        if at_limit(ledger.weekly_loss(), limits.max_weekly_loss) {
            return reject(
                GATE,
                RejectReason::WeeklyLossLimit,
                format!("weekly loss {} >= {}", ledger.weekly_loss(), limits.max_weekly_loss),
            );
        }
        if at_limit(ledger.monthly_loss(), limits.max_monthly_loss) {
            return reject(
                GATE,
                RejectReason::MonthlyLossLimit,
                format!(
                    "monthly loss {} >= {}",
                    ledger.monthly_loss(),
                    limits.max_monthly_loss
                ),
            );
        }
        if ledger.drawdown_breached() {
            return reject(
                GATE,
                RejectReason::DrawdownLimit,
                format!(
                    "equity {} below {} of peak {}",
                    ledger.equity(),
                    limits.max_drawdown,
                    ledger.equity_peak()
                ),
            );
        }
        // Admitted with whatever headroom is left; the engine sizes down to it.
        if let Some(headroom) = ledger.risk_headroom() {
            if headroom < signal.risk_per_unit() {
                return reject(
                    GATE,
                    RejectReason::DailyRiskLimit,
                    format!(
                        "committed risk {} leaves {} under {}",
                        ledger.committed_risk(),
                        headroom,
                        limits.max_daily_risk
                    ),
                );
            }
        }
        if at_cap(ledger.committed_trades(), limits.max_trades_per_day) {
            return reject(
                GATE,
                RejectReason::MaxTradesPerDay,
                format!("{} trades today", ledger.committed_trades()),
            );
        }
        if at_cap(ledger.consecutive_losses(), limits.max_consecutive_losses) {
            return reject(
                GATE,
                RejectReason::ConsecutiveLosses,
                format!("{} losses in a row", ledger.consecutive_losses()),
            );
        }
        if at_cap(ledger.committed_open_positions(), limits.max_open_positions) {
            return reject(
                GATE,
                RejectReason::MaxOpenPositions,
                format!("{} positions open", ledger.committed_open_positions()),
            );
        }
        let instrument = ledger.committed_for_instrument(&signal.symbol);
        if at_cap(instrument, limits.max_trades_per_instrument) {
            return reject(
                GATE,
                RejectReason::InstrumentCap,
                format!("{} has {} trades", signal.symbol, instrument),
            );
        }
        let sector = signal.sector_or_unknown();
        let sector_count = ledger.committed_for_sector(sector);
        if at_cap(sector_count, limits.max_trades_per_sector) {
            return reject(
                GATE,
                RejectReason::SectorCap,
                format!("sector {} has {} trades", sector, sector_count),
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 2. Flood control
    // ------------------------------------------------------------------

    fn check_flood(&self, signal: &Signal, ctx: &MarketContext, ledger: &RiskLedger) -> Check {
        const GATE: &str = "flood";
        let per_minute = ledger.signals_this_minute(ctx.now);
        if at_cap(per_minute, self.config.max_signals_per_minute) {
            return reject(
                GATE,
                RejectReason::SignalFlood,
                format!("{} signals this minute", per_minute),
            );
        }
        if at_cap(ledger.signal_count(), self.config.max_signals_per_day) {
            return reject(
                GATE,
                RejectReason::DailySignalCap,
                format!("{} signals today", ledger.signal_count()),
            );
        }
        if self.is_high_volatility(ctx) {
            if let Some(left) = ledger.volatility_remaining(&signal.symbol, ctx.now) {
                return reject(
                    GATE,
                    RejectReason::VolatilityThrottle,
                    format!(
                        "volatility {} above {}, {} re-entry in {}s",
                        ctx.volatility_index.unwrap_or_default(),
                        self.config.volatility_threshold,
                        signal.symbol,
                        left.num_seconds()
                    ),
                );
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 3. Trade quality
    // ------------------------------------------------------------------

    fn check_quality(&self, signal: &Signal, ctx: &MarketContext) -> Check {
        self.check_reward_risk(signal)?;
        self.check_stop_distance(signal)?;
        self.check_sr_proximity(signal, ctx)?;
        self.check_volume(signal, ctx)?;
        self.check_execution_costs(signal)?;
        self.check_range_and_wick(signal, ctx)
    }

    fn check_reward_risk(&self, signal: &Signal) -> Check {
        let Some(min_rr) = self.config.min_rr.min_rr(&signal.meta) else {
            return reject(
                "reward_risk",
                RejectReason::RrTooLow,
                format!(
                    "{} needs win rate above {}",
                    signal.meta.category, self.config.min_rr.scalping_min_win_rate
                ),
            );
        };
        let Some(rr) = signal.risk_reward() else {
            return reject("reward_risk", RejectReason::RrTooLow, "zero risk distance");
        };
        if rr < min_rr {
            return reject(
                "reward_risk",
                RejectReason::RrTooLow,
                format!("rr {} < {}", rr.round_dp(2), min_rr),
            );
        }
        Ok(())
    }

    fn check_stop_distance(&self, signal: &Signal) -> Check {
        let Some(atr) = signal.atr.filter(|a| a.is_positive()).map(|a| a.inner()) else {
            return Ok(());
        };
        let distance = signal.risk_per_unit();
        let c = &self.config;

        if c.sl_noise_atr > Decimal::ZERO && distance <= atr * c.sl_noise_atr {
            return reject(
                "stop_distance",
                RejectReason::SlInvalid,
                format!("stop {} inside noise ({} x ATR {})", distance, c.sl_noise_atr, atr),
            );
        }
        if c.sl_min_atr > Decimal::ZERO && distance < atr * c.sl_min_atr {
            return reject(
                "stop_distance",
                RejectReason::SlInvalid,
                format!("stop {} tighter than {} x ATR {}", distance, c.sl_min_atr, atr),
            );
        }
        if c.sl_max_atr > Decimal::ZERO && distance > atr * c.sl_max_atr {
            return reject(
                "stop_distance",
                RejectReason::SlInvalid,
                format!("stop {} wider than {} x ATR {}", distance, c.sl_max_atr, atr),
            );
        }
        Ok(())
    }

    fn check_sr_proximity(&self, signal: &Signal, ctx: &MarketContext) -> Check {
        if self.config.min_sr_distance_pct <= Decimal::ZERO {
            return Ok(());
        }
        let entry = signal.entry.inner();
        // Level in the trade's path.
        let room = match signal.direction {
            Direction::Long => ctx
                .resistance
                .map(|r| r.inner())
                .filter(|r| *r > entry)
                .map(|r| r - entry),
            Direction::Short => ctx
                .support
                .map(|s| s.inner())
                .filter(|s| *s < entry)
                .map(|s| entry - s),
        };
        let Some(room) = room else {
            return Ok(());
        };
        let room_pct = room / entry * HUNDRED;
        if room_pct < self.config.min_sr_distance_pct {
            return reject(
                "sr_proximity",
                RejectReason::SrProximity,
                format!(
                    "{}% to opposing level < {}%",
                    room_pct.round_dp(2),
                    self.config.min_sr_distance_pct
                ),
            );
        }
        Ok(())
    }

    fn check_volume(&self, signal: &Signal, ctx: &MarketContext) -> Check {
        let multiple = self.config.breakout_volume_multiple;
        if signal.meta.category != StrategyCategory::Breakout || multiple <= Decimal::ZERO {
            return Ok(());
        }
        let (Some(volume), Some(avg)) = (signal.volume, ctx.avg_volume) else {
            return Ok(());
        };
        if avg > Decimal::ZERO && volume < avg * multiple {
            return reject(
                "volume",
                RejectReason::VolumeNotConfirmed,
                format!("volume {} < {} x avg {}", volume, multiple, avg),
            );
        }
        Ok(())
    }

    fn check_execution_costs(&self, signal: &Signal) -> Check {
        let c = &self.config;
        if let Some(spread) = signal.spread_pct {
            if c.max_spread_pct > Decimal::ZERO && spread > c.max_spread_pct {
                return reject(
                    "spread",
                    RejectReason::SpreadTooWide,
                    format!("spread {}% > {}%", spread, c.max_spread_pct),
                );
            }
        }
        if let Some(liquidity) = signal.liquidity {
            if c.min_liquidity > Decimal::ZERO && liquidity < c.min_liquidity {
                return reject(
                    "liquidity",
                    RejectReason::LowLiquidity,
                    format!("liquidity {} < {}", liquidity, c.min_liquidity),
                );
            }
        }
        Ok(())
    }

    fn check_range_and_wick(&self, signal: &Signal, ctx: &MarketContext) -> Check {
        let c = &self.config;
        if let (Some(range), Some(atr)) = (ctx.day_range(), signal.atr) {
            if c.max_range_atr > Decimal::ZERO
                && atr.is_positive()
                && range > atr.inner() * c.max_range_atr
            {
                return reject(
                    "range_spike",
                    RejectReason::RangeSpike,
                    format!("day range {} > {} x ATR {}", range, c.max_range_atr, atr),
                );
            }
        }
        if let Some(candle) = &signal.candle {
            let range = candle.range();
            if c.max_wick_ratio > Decimal::ZERO && range > Decimal::ZERO {
                // Wick against the trade: sellers above a long, buyers below a short.
                let wick = match signal.direction {
                    Direction::Long => candle.upper_wick(),
                    Direction::Short => candle.lower_wick(),
                };
                let ratio = wick / range;
                if ratio > c.max_wick_ratio {
                    return reject(
                        "wick",
                        RejectReason::WickRejection,
                        format!("adverse wick {} of range", ratio.round_dp(2)),
                    );
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 4. Timing
    // ------------------------------------------------------------------

    fn check_timing(&self, signal: &Signal, now: DateTime<Utc>) -> Check {
        match self.calendar.timing_block(&signal.symbol, now) {
            Some(block) => reject("timing", RejectReason::TimingBlocked, block.to_string()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // 5. Conflicts
    // ------------------------------------------------------------------

    fn check_conflicts(&self, signal: &Signal, now: DateTime<Utc>, ledger: &RiskLedger) -> Check {
        let key = signal.dedupe_key();
        if let Some(left) = ledger.duplicate_remaining(&key, now) {
            return reject(
                "duplicate",
                RejectReason::DuplicateWindow,
                format!("{} seen, {}s left", key, left.num_seconds()),
            );
        }
        if let Some(group) = signal.correlation_key() {
            if let Some(left) = ledger.correlation_remaining(group, now) {
                return reject(
                    "correlation",
                    RejectReason::CorrelationCooldown,
                    format!("group {} cooling down, {}s left", group, left.num_seconds()),
                );
            }
        }
        if let Some(left) = ledger.strategy_cooldown_remaining(&signal.meta.strategy, now) {
            return reject(
                "strategy_cooldown",
                RejectReason::StrategyCooldown,
                format!(
                    "{} cooling down after failure, {}",
                    signal.meta.strategy,
                    fmt_remaining(left)
                ),
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 6. Regime
    // ------------------------------------------------------------------

    fn check_regime(&self, signal: &Signal, ctx: &MarketContext) -> Check {
        if !self.config.enforce_regime {
            return Ok(());
        }
        match ctx.regime {
            Some(regime) if !regime.allows(signal.direction) => reject(
                "regime",
                RejectReason::RegimeMismatch,
                format!("{} against {} regime", signal.direction, regime),
            ),
            _ => Ok(()),
        }
    }
}

/// Decimal ceiling reached. Zero disables.
fn at_limit(value: Decimal, limit: Decimal) -> bool {
    limit > Decimal::ZERO && value >= limit
}

/// Count cap reached. Zero disables.
fn at_cap(count: u32, cap: u32) -> bool {
    cap > 0 && count >= cap
}

fn fmt_remaining(left: Duration) -> String {
    let secs = left.num_seconds();
    if secs >= 60 {
        format!("{}m{}s left", secs / 60, secs % 60)
    } else {
        format!("{}s left", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::RiskLimits;
    use crate::ledger::test_support::{ledger_with, market_open, signal};
    use crate::pause::PauseReason;
    use rust_decimal_macros::dec;
    use sigex_core::{AlgoMeta, Candle, Price, Regime};

    struct Fixture {
        gate: AdmissionGate,
        audit: Arc<MemoryAuditSink>,
    }

    fn fixture_with(config: GateConfig, limits: RiskLimits) -> Fixture {
        let audit = Arc::new(MemoryAuditSink::new());
        let ledger = LedgerHandle::new(ledger_with(limits));
        let gate = AdmissionGate::new(
            config,
            Arc::new(SessionCalendar::indian_equities()),
            ledger,
            audit.clone(),
        );
        Fixture { gate, audit }
    }

    fn fixture() -> Fixture {
        fixture_with(GateConfig::default(), RiskLimits::default())
    }

    fn ctx() -> MarketContext {
        MarketContext::at(market_open())
    }

    #[test]
    fn test_rr_enforcement_for_breakout() {
        let f = fixture();
        let good = signal("INFY", "IT", "orb");
        assert_eq!(f.gate.evaluate(&good, &ctx()), Verdict::Accepted);

        let mut weak = signal("TCS", "IT2", "orb2");
        weak.target1 = Price::new(dec!(108));
        let verdict = f.gate.evaluate(&weak, &ctx());
        assert_eq!(verdict.reason(), Some(RejectReason::RrTooLow));
        assert_eq!(f.audit.reasons(), vec![RejectReason::RrTooLow]);
    }

    #[test]
    fn test_duplicate_within_window_is_rejected() {
        let f = fixture();
        let first = signal("INFY", "IT", "orb");
        let second = signal("INFY", "IT", "orb");

        assert!(f.gate.evaluate(&first, &ctx()).is_ok());
        let verdict = f.gate.evaluate(&second, &ctx());
        assert_eq!(verdict.reason(), Some(RejectReason::DuplicateWindow));

        // After the window a repeat is allowed again (correlation window is longer).
        let later = MarketContext::at(market_open() + Duration::minutes(16));
        assert!(f.gate.evaluate(&second, &later).is_ok());
    }

    #[test]
    fn test_correlation_cooldown_across_symbols() {
        let f = fixture();
        let infy = signal("INFY", "IT", "orb");
        let tcs = signal("TCS", "IT", "vwap_reclaim");

        assert!(f.gate.evaluate(&infy, &ctx()).is_ok());
        let verdict = f.gate.evaluate(&tcs, &ctx());
        assert_eq!(verdict.reason(), Some(RejectReason::CorrelationCooldown));
    }

    #[test]
    fn test_explicit_correlation_group_overrides_sector() {
        let f = fixture();
        let mut a = signal("HDFCBANK", "BANK", "orb");
        a.correlation_group = Some("rate_sensitive".to_string());
        let mut b = signal("DLF", "REALTY", "orb_realty");
        b.correlation_group = Some("rate_sensitive".to_string());

        assert!(f.gate.evaluate(&a, &ctx()).is_ok());
        assert_eq!(
            f.gate.evaluate(&b, &ctx()).reason(),
            Some(RejectReason::CorrelationCooldown)
        );
    }

    #[test]
    fn test_daily_loss_breach_rejects_until_next_day() {
        let f = fixture_with(
            GateConfig::default(),
            RiskLimits {
                max_daily_loss: dec!(1000),
                ..Default::default()
            },
        );
        f.gate
            .ledger()
            .record_result(dec!(-1000), dec!(500), "INFY", "IT", "orb", market_open());

        for (i, sector) in ["A", "B", "C"].iter().enumerate() {
            let s = signal(&format!("SYM{i}"), sector, &format!("strat{i}"));
            let verdict = f.gate.evaluate(&s, &ctx());
            assert_eq!(verdict.reason(), Some(RejectReason::TradingPaused));
        }

        let tomorrow = MarketContext::at(market_open() + Duration::days(1));
        let s = signal("WIPRO", "IT", "fresh");
        assert!(f.gate.evaluate(&s, &tomorrow).is_ok());
    }

    #[test]
    fn test_manual_pause_rejects() {
        let f = fixture();
        f.gate.ledger().pause(PauseReason::Manual {
            message: "RBI policy".to_string(),
        });
        let verdict = f.gate.evaluate(&signal("INFY", "IT", "orb"), &ctx());
        assert_eq!(verdict.reason(), Some(RejectReason::TradingPaused));
    }

    #[test]
    fn test_invalid_and_expired_signals() {
        let f = fixture();
        let mut inverted = signal("INFY", "IT", "orb");
        inverted.stop_loss = Price::new(dec!(105));
        assert_eq!(
            f.gate.evaluate(&inverted, &ctx()).reason(),
            Some(RejectReason::InvalidSignal)
        );

        let mut stale = signal("INFY", "IT", "orb");
        stale.expires_at = Some(market_open() - Duration::seconds(1));
        assert_eq!(
            f.gate.evaluate(&stale, &ctx()).reason(),
            Some(RejectReason::SignalExpired)
        );
    }

    #[test]
    fn test_stop_distance_vs_atr() {
        let f = fixture();
        // 1.0 stop on ATR 5 is inside the noise floor.
        let mut tight = signal("INFY", "IT", "orb");
        tight.stop_loss = Price::new(dec!(99));
        tight.target1 = Price::new(dec!(110));
        assert_eq!(
            f.gate.evaluate(&tight, &ctx()).reason(),
            Some(RejectReason::SlInvalid)
        );

        // 20 stop on ATR 5 exceeds 3 x ATR.
        let mut wide = signal("TCS", "IT", "orb");
        wide.stop_loss = Price::new(dec!(80));
        wide.target1 = Price::new(dec!(150));
        assert_eq!(
            f.gate.evaluate(&wide, &ctx()).reason(),
            Some(RejectReason::SlInvalid)
        );
    }

    #[test]
    fn test_scalping_without_win_rate_never_passes() {
        let f = fixture();
        let mut s = signal("INFY", "IT", "scalp");
        s.meta = AlgoMeta {
            strategy: "scalp".to_string(),
            category: StrategyCategory::Scalping,
            win_rate: Some(0.5),
        };
        assert_eq!(
            f.gate.evaluate(&s, &ctx()).reason(),
            Some(RejectReason::RrTooLow)
        );
    }

    #[test]
    fn test_quality_filters() {
        let f = fixture();

        let mut near_resistance = signal("A", "S1", "s1");
        let c = ctx();
        let c = MarketContext {
            resistance: Some(Price::new(dec!(100.2))),
            ..c
        };
        near_resistance.entry = Price::new(dec!(100));
        assert_eq!(
            f.gate.evaluate(&near_resistance, &c).reason(),
            Some(RejectReason::SrProximity)
        );

        let mut thin_volume = signal("B", "S2", "s2");
        thin_volume.volume = Some(dec!(1000));
        let c = MarketContext {
            avg_volume: Some(dec!(1000)),
            ..ctx()
        };
        assert_eq!(
            f.gate.evaluate(&thin_volume, &c).reason(),
            Some(RejectReason::VolumeNotConfirmed)
        );

        let mut wide_spread = signal("C", "S3", "s3");
        wide_spread.spread_pct = Some(dec!(0.8));
        assert_eq!(
            f.gate.evaluate(&wide_spread, &ctx()).reason(),
            Some(RejectReason::SpreadTooWide)
        );

        let spiky = signal("D", "S4", "s4");
        let c = MarketContext {
            day_high: Some(Price::new(dec!(130))),
            day_low: Some(Price::new(dec!(100))),
            ..ctx()
        };
        assert_eq!(
            f.gate.evaluate(&spiky, &c).reason(),
            Some(RejectReason::RangeSpike)
        );

        let mut wicky = signal("E", "S5", "s5");
        wicky.candle = Some(Candle {
            open: Price::new(dec!(99)),
            high: Price::new(dec!(110)),
            low: Price::new(dec!(98)),
            close: Price::new(dec!(100)),
        });
        assert_eq!(
            f.gate.evaluate(&wicky, &ctx()).reason(),
            Some(RejectReason::WickRejection)
        );
    }

    #[test]
    fn test_timing_blocks_weekend_and_open_buffer() {
        let f = fixture();
        // Saturday 2024-06-15.
        let weekend = MarketContext::at(market_open() + Duration::days(3));
        assert_eq!(
            f.gate.evaluate(&signal("INFY", "IT", "orb"), &weekend).reason(),
            Some(RejectReason::TimingBlocked)
        );

        // 09:20 IST sits in the 15 minute open buffer.
        let early = MarketContext::at(market_open() - Duration::minutes(70));
        assert_eq!(
            f.gate.evaluate(&signal("TCS", "IT", "orb"), &early).reason(),
            Some(RejectReason::TimingBlocked)
        );
    }

    #[test]
    fn test_regime_alignment() {
        let f = fixture();
        let c = ctx().with_regime(Regime::Bearish);
        assert_eq!(
            f.gate.evaluate(&signal("INFY", "IT", "orb"), &c).reason(),
            Some(RejectReason::RegimeMismatch)
        );

        let f = fixture_with(
            GateConfig {
                enforce_regime: false,
                ..Default::default()
            },
            RiskLimits::default(),
        );
        assert!(f.gate.evaluate(&signal("INFY", "IT", "orb"), &c).is_ok());
    }

    #[test]
    fn test_caps_count_reservations() {
        let f = fixture_with(
            GateConfig::default(),
            RiskLimits {
                max_open_positions: 2,
                ..Default::default()
            },
        );
        assert!(f.gate.evaluate(&signal("A", "S1", "s1"), &ctx()).is_ok());
        assert!(f.gate.evaluate(&signal("B", "S2", "s2"), &ctx()).is_ok());
        assert_eq!(
            f.gate.evaluate(&signal("C", "S3", "s3"), &ctx()).reason(),
            Some(RejectReason::MaxOpenPositions)
        );
    }

    #[test]
    fn test_unsized_signals_reserve_daily_risk() {
        let f = fixture_with(
            GateConfig::default(),
            RiskLimits {
                max_daily_risk: dec!(1500),
                ..Default::default()
            },
        );
        let unsized_signal = |symbol: &str, sector: &str, strategy: &str| {
            let mut s = signal(symbol, sector, strategy);
            s.quantity = 0;
            s
        };

        let a = unsized_signal("A", "S1", "s1");
        assert!(f.gate.evaluate(&a, &ctx()).is_ok());
        assert_eq!(f.gate.ledger().reserved_risk(&a.id), Some(dec!(1000)));

        // Only the remaining headroom is held for the second trade.
        let b = unsized_signal("B", "S2", "s2");
        assert!(f.gate.evaluate(&b, &ctx()).is_ok());
        assert_eq!(f.gate.ledger().reserved_risk(&b.id), Some(dec!(500)));

        assert_eq!(
            f.gate
                .evaluate(&unsized_signal("C", "S3", "s3"), &ctx())
                .reason(),
            Some(RejectReason::DailyRiskLimit)
        );
    }

    #[test]
    fn test_unsized_trade_risk_is_configurable() {
        let audit = Arc::new(MemoryAuditSink::new());
        let gate = AdmissionGate::new(
            GateConfig::default(),
            Arc::new(SessionCalendar::indian_equities()),
            LedgerHandle::new(ledger_with(RiskLimits::default())),
            audit,
        )
        .with_unsized_trade_risk(dec!(250));
        let mut s = signal("A", "S1", "s1");
        s.quantity = 0;
        assert!(gate.evaluate(&s, &ctx()).is_ok());
        assert_eq!(gate.ledger().reserved_risk(&s.id), Some(dec!(250)));
    }

    #[test]
    fn test_flood_control_per_minute() {
        let f = fixture_with(
            GateConfig {
                max_signals_per_minute: 2,
                ..Default::default()
            },
            RiskLimits::default(),
        );
        assert!(f.gate.evaluate(&signal("A", "S1", "s1"), &ctx()).is_ok());
        assert!(f.gate.evaluate(&signal("B", "S2", "s2"), &ctx()).is_ok());
        assert_eq!(
            f.gate.evaluate(&signal("C", "S3", "s3"), &ctx()).reason(),
            Some(RejectReason::SignalFlood)
        );
        let next_minute = MarketContext::at(market_open() + Duration::seconds(61));
        assert!(f.gate.evaluate(&signal("C", "S3", "s3"), &next_minute).is_ok());
    }

    #[test]
    fn test_volatility_throttle_per_symbol() {
        let f = fixture();
        let hot = ctx().with_volatility(dec!(30));
        assert!(f.gate.evaluate(&signal("INFY", "IT", "orb"), &hot).is_ok());

        // Different strategy and sector, same symbol.
        let verdict = f.gate.evaluate(&signal("INFY", "IT_ALT", "vwap"), &hot);
        assert_eq!(verdict.reason(), Some(RejectReason::VolatilityThrottle));
    }

    #[test]
    fn test_strategy_cooldown_after_failure() {
        let f = fixture();
        f.gate
            .ledger()
            .record_strategy_failure("orb", market_open() - Duration::minutes(1));
        assert_eq!(
            f.gate.evaluate(&signal("INFY", "IT", "orb"), &ctx()).reason(),
            Some(RejectReason::StrategyCooldown)
        );
    }

    #[test]
    fn test_fmt_remaining() {
        assert_eq!(fmt_remaining(Duration::seconds(45)), "45s left");
        assert_eq!(fmt_remaining(Duration::seconds(125)), "2m5s left");
    }
}
