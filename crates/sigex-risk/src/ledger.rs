//! Process-wide admission state.
//!
//! `RiskLedger` owns every counter and suppression window the admission
//! gate consults. All mutation happens behind the single mutex inside
//! [`LedgerHandle`], so a check and its recording step are atomic with
//! respect to concurrent evaluations.
//!
//! Capacity caps count executed trades plus in-flight reservations. A
//! reservation is taken when the gate accepts a signal and is either
//! converted by [`RiskLedger::record_execution`] or returned by
//! [`RiskLedger::release_reservation`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sigex_core::{PeriodKey, SessionCalendar, Signal, SignalId};
use sigex_telemetry::Metrics;

use crate::config::{GateConfig, RiskLimits};
use crate::error::{RiskError, RiskResult};
use crate::pause::{PauseLatch, PauseReason};
use crate::ttl_window::TtlWindow;

const FLOOD_BUCKET_SECS: i64 = 60;

/// Capacity held for an accepted signal that has not executed yet.
#[derive(Debug, Clone)]
struct Reservation {
    symbol: String,
    sector: String,
    risk: Decimal,
}

/// Compact ledger view attached to rejection and outcome logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub daily_loss: Decimal,
    pub weekly_loss: Decimal,
    pub monthly_loss: Decimal,
    pub daily_risk: Decimal,
    pub equity: Decimal,
    pub equity_peak: Decimal,
    pub trades_today: u32,
    pub open_positions: u32,
    pub reserved: usize,
    pub consecutive_losses: u32,
    pub signal_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub paused: bool,
}

impl fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss d/w/m={}/{}/{} risk={} equity={} peak={} trades={} open={} reserved={} streak={} signals={} paused={}",
            self.daily_loss,
            self.weekly_loss,
            self.monthly_loss,
            self.daily_risk,
            self.equity,
            self.equity_peak,
            self.trades_today,
            self.open_positions,
            self.reserved,
            self.consecutive_losses,
            self.signal_count,
            self.paused
        )
    }
}

/// Serializable ledger state for crash recovery.
///
/// In-flight reservations and open positions are not carried: their
/// monitors do not survive a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub period: PeriodKey,
    pub daily_loss: Decimal,
    pub weekly_loss: Decimal,
    pub monthly_loss: Decimal,
    pub daily_risk: Decimal,
    pub equity: Decimal,
    pub equity_peak: Decimal,
    pub trade_count: u32,
    pub per_instrument: BTreeMap<String, u32>,
    pub per_sector: BTreeMap<String, u32>,
    pub consecutive_losses: u32,
    pub signal_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub paused: Option<PauseReason>,
    #[serde(default)]
    pub duplicate_window: Vec<(String, DateTime<Utc>)>,
    #[serde(default)]
    pub correlation_window: Vec<(String, DateTime<Utc>)>,
    #[serde(default)]
    pub strategy_window: Vec<(String, DateTime<Utc>)>,
}

impl LedgerSnapshot {
    /// Write as JSON. The file is replaced atomically via a sibling temp file.
    pub fn save(&self, path: &Path) -> RiskResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Ledger snapshot written");
        Ok(())
    }

    /// Read a snapshot. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> RiskResult<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(RiskError::Snapshot(format!("{} is empty", path.display())));
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Mutable admission state for one trading engine.
#[derive(Debug)]
pub struct RiskLedger {
    limits: RiskLimits,
    calendar: Arc<SessionCalendar>,
    period: PeriodKey,

    daily_loss: Decimal,
    weekly_loss: Decimal,
    monthly_loss: Decimal,
    daily_risk: Decimal,
    equity: Decimal,
    equity_peak: Decimal,

    trade_count: u32,
    per_instrument: HashMap<String, u32>,
    per_sector: HashMap<String, u32>,
    consecutive_losses: u32,
    signal_count: u32,
    open_positions: u32,
    wins: u32,
    losses: u32,

    reservations: HashMap<SignalId, Reservation>,

    duplicate: TtlWindow<String>,
    correlation: TtlWindow<String>,
    strategy_failures: TtlWindow<String>,
    volatility: TtlWindow<String>,
    flood: TtlWindow<i64, u32>,

    pause: Arc<PauseLatch>,
}

impl RiskLedger {
    pub fn new(
        limits: RiskLimits,
        gates: &GateConfig,
        calendar: Arc<SessionCalendar>,
        now: DateTime<Utc>,
    ) -> Self {
        let period = calendar.period_key(now);
        let equity = limits.starting_equity;
        Self {
            limits,
            calendar,
            period,
            daily_loss: Decimal::ZERO,
            weekly_loss: Decimal::ZERO,
            monthly_loss: Decimal::ZERO,
            daily_risk: Decimal::ZERO,
            equity,
            equity_peak: equity,
            trade_count: 0,
            per_instrument: HashMap::new(),
            per_sector: HashMap::new(),
            consecutive_losses: 0,
            signal_count: 0,
            open_positions: 0,
            wins: 0,
            losses: 0,
            reservations: HashMap::new(),
            duplicate: TtlWindow::new(secs(gates.duplicate_window_secs)),
            correlation: TtlWindow::new(secs(gates.correlation_window_secs)),
            strategy_failures: TtlWindow::new(secs(gates.strategy_cooldown_secs)),
            volatility: TtlWindow::new(secs(gates.volatility_throttle_secs)),
            flood: TtlWindow::new(Duration::seconds(FLOOD_BUCKET_SECS * 2)),
            pause: Arc::new(PauseLatch::new()),
        }
    }

    // ------------------------------------------------------------------
    // Period rollover
    // ------------------------------------------------------------------

    /// Reset counters whose calendar period ended. Returns `true` if the day rolled.
    pub fn reset_if_period_rolled(&mut self, now: DateTime<Utc>) -> bool {
        let current = self.calendar.period_key(now);
        if current == self.period {
            return false;
        }

        let day_rolled = current.day != self.period.day;
        if current.month != self.period.month {
            self.monthly_loss = Decimal::ZERO;
        }
        if current.week != self.period.week {
            self.weekly_loss = Decimal::ZERO;
        }
        if day_rolled {
            info!(
                previous = %self.period.day,
                current = %current.day,
                stats = %self.stats(),
                "Trading day rolled, resetting daily counters"
            );
            self.daily_loss = Decimal::ZERO;
            self.daily_risk = Decimal::ZERO;
            self.trade_count = 0;
            self.per_instrument.clear();
            self.per_sector.clear();
            self.consecutive_losses = 0;
            self.signal_count = 0;
            self.wins = 0;
            self.losses = 0;
            self.flood.clear();
            self.pause.reset();
            Metrics::ledger_paused(false);
            Metrics::daily_loss(0.0);
        }
        self.period = current;
        self.evict_expired(now);
        day_rolled
    }

    /// Drop expired window entries.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        self.duplicate.evict_expired(now)
            + self.correlation.evict_expired(now)
            + self.strategy_failures.evict_expired(now)
            + self.volatility.evict_expired(now)
            + self.flood.evict_expired(now)
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Count a signal toward the daily cap and its per-minute bucket.
    pub fn record_signal_seen(&mut self, now: DateTime<Utc>) {
        self.signal_count += 1;
        self.flood.upsert(flood_bucket(now), now, |c| *c += 1);
    }

    /// Bookkeeping for an accepted signal: windows, counters and a capacity reservation.
    ///
    /// `risk` is held against `max_daily_risk` until the trade executes or the
    /// reservation is released.
    pub fn record_admission(
        &mut self,
        signal: &Signal,
        now: DateTime<Utc>,
        high_volatility: bool,
        risk: Decimal,
    ) {
        self.duplicate.touch(signal.dedupe_key(), now);
        if let Some(group) = signal.correlation_key() {
            self.correlation.touch(group.to_string(), now);
        }
        if high_volatility {
            self.volatility.touch(signal.symbol.clone(), now);
        }
        self.record_signal_seen(now);
        self.reservations.insert(
            signal.id.clone(),
            Reservation {
                symbol: signal.symbol.clone(),
                sector: signal.sector_or_unknown().to_string(),
                risk,
            },
        );
    }

    /// Convert the signal's reservation into an executed trade.
    ///
    /// `risk` is the amount actually committed after sizing.
    pub fn record_execution(&mut self, signal: &Signal, risk: Decimal) {
        if self.reservations.remove(&signal.id).is_none() {
            debug!(signal_id = %signal.id, "Execution recorded without reservation");
        }
        self.trade_count += 1;
        *self
            .per_instrument
            .entry(signal.symbol.clone())
            .or_insert(0) += 1;
        *self
            .per_sector
            .entry(signal.sector_or_unknown().to_string())
            .or_insert(0) += 1;
        self.open_positions += 1;
        self.daily_risk += risk;
        Metrics::open_trades_set(i64::from(self.open_positions));

        debug!(
            symbol = %signal.symbol,
            sector = signal.sector_or_unknown(),
            risk = %risk,
            trades_today = self.trade_count,
            open = self.open_positions,
            "Execution recorded"
        );
    }

    /// Return capacity held for a signal that will not execute.
    pub fn release_reservation(&mut self, signal_id: &SignalId) -> bool {
        let released = self.reservations.remove(signal_id);
        if let Some(r) = &released {
            debug!(signal_id = %signal_id, symbol = %r.symbol, "Reservation released");
        }
        released.is_some()
    }

    /// Undo an admission whose trade never reached the broker, so a retry can pass again.
    ///
    /// Returns the reservation and clears the duplicate and correlation stamps.
    pub fn rollback_admission(&mut self, signal: &Signal) {
        self.release_reservation(&signal.id);
        self.duplicate.remove(signal.dedupe_key().as_str());
        if let Some(group) = signal.correlation_key() {
            self.correlation.remove(group);
        }
        debug!(signal_id = %signal.id, symbol = %signal.symbol, "Admission rolled back");
    }

    /// Free an open-position slot for a trade that ended without a known result.
    pub fn release_position(&mut self, symbol: &str) {
        self.open_positions = self.open_positions.saturating_sub(1);
        Metrics::open_trades_set(i64::from(self.open_positions));
        debug!(symbol, open = self.open_positions, "Position slot released");
    }

    /// Apply a closed trade's result. Trips the pause latch on a loss or drawdown breach.
    pub fn record_result(
        &mut self,
        pnl: Decimal,
        risk_taken: Decimal,
        symbol: &str,
        sector: &str,
        strategy: &str,
        now: DateTime<Utc>,
    ) {
        self.equity += pnl;
        if self.equity > self.equity_peak {
            self.equity_peak = self.equity;
        }
        self.open_positions = self.open_positions.saturating_sub(1);

        if pnl < Decimal::ZERO {
            let loss = -pnl;
            self.daily_loss += loss;
            self.weekly_loss += loss;
            self.monthly_loss += loss;
            self.consecutive_losses += 1;
            self.losses += 1;
            self.strategy_failures.touch(strategy.to_string(), now);
        } else {
            self.wins += 1;
            self.consecutive_losses = 0;
        }

        let r_multiple = if risk_taken > Decimal::ZERO {
            (pnl / risk_taken).round_dp(2)
        } else {
            Decimal::ZERO
        };
        info!(
            symbol,
            sector,
            strategy,
            pnl = %pnl,
            r_multiple = %r_multiple,
            daily_loss = %self.daily_loss,
            equity = %self.equity,
            streak = self.consecutive_losses,
            "Trade result recorded"
        );

        if self.limits.max_daily_loss > Decimal::ZERO && self.daily_loss >= self.limits.max_daily_loss
        {
            self.pause.trigger_at(
                PauseReason::DailyLoss {
                    loss: self.daily_loss,
                    limit: self.limits.max_daily_loss,
                },
                now,
            );
        } else if self.drawdown_breached() {
            self.pause.trigger_at(
                PauseReason::Drawdown {
                    equity: self.equity,
                    peak: self.equity_peak,
                },
                now,
            );
        }

        Metrics::open_trades_set(i64::from(self.open_positions));
        Metrics::daily_loss(self.daily_loss.to_f64().unwrap_or_default());
        Metrics::equity(self.equity.to_f64().unwrap_or_default());
        Metrics::ledger_paused(self.pause.is_paused());
    }

    /// Arm the per-strategy cooldown after a failed placement.
    pub fn record_strategy_failure(&mut self, strategy: &str, now: DateTime<Utc>) {
        warn!(strategy, "Strategy cooldown armed after failure");
        self.strategy_failures.touch(strategy.to_string(), now);
    }

    /// Operator pause.
    pub fn pause(&mut self, reason: PauseReason) -> bool {
        let tripped = self.pause.trigger(reason);
        Metrics::ledger_paused(true);
        tripped
    }

    /// Operator resume.
    pub fn resume(&mut self) {
        self.pause.reset();
        Metrics::ledger_paused(false);
    }

    // ------------------------------------------------------------------
    // Queries used by the gate
    // ------------------------------------------------------------------

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn period(&self) -> PeriodKey {
        self.period
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause.reason()
    }

    pub fn pause_latch(&self) -> Arc<PauseLatch> {
        Arc::clone(&self.pause)
    }

    pub fn daily_loss(&self) -> Decimal {
        self.daily_loss
    }

    pub fn weekly_loss(&self) -> Decimal {
        self.weekly_loss
    }

    pub fn monthly_loss(&self) -> Decimal {
        self.monthly_loss
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    pub fn equity_peak(&self) -> Decimal {
        self.equity_peak
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn signal_count(&self) -> u32 {
        self.signal_count
    }

    /// Equity sits below the drawdown floor derived from its peak.
    pub fn drawdown_breached(&self) -> bool {
        let floor = self.equity_peak * (Decimal::ONE - self.limits.max_drawdown);
        self.limits.max_drawdown > Decimal::ZERO && self.equity < floor
    }

    /// Daily risk executed plus reserved.
    pub fn committed_risk(&self) -> Decimal {
        self.daily_risk + self.reservations.values().map(|r| r.risk).sum::<Decimal>()
    }

    /// Risk still available under `max_daily_risk`. `None` when the cap is off.
    pub fn risk_headroom(&self) -> Option<Decimal> {
        (self.limits.max_daily_risk > Decimal::ZERO)
            .then(|| self.limits.max_daily_risk - self.committed_risk())
    }

    /// Risk held by a pending reservation.
    pub fn reserved_risk(&self, signal_id: &SignalId) -> Option<Decimal> {
        self.reservations.get(signal_id).map(|r| r.risk)
    }

    /// Trades executed today plus reserved.
    pub fn committed_trades(&self) -> u32 {
        self.trade_count + self.reservations.len() as u32
    }

    pub fn committed_open_positions(&self) -> u32 {
        self.open_positions + self.reservations.len() as u32
    }

    pub fn committed_for_instrument(&self, symbol: &str) -> u32 {
        let reserved = self
            .reservations
            .values()
            .filter(|r| r.symbol == symbol)
            .count() as u32;
        self.per_instrument.get(symbol).copied().unwrap_or(0) + reserved
    }

    pub fn committed_for_sector(&self, sector: &str) -> u32 {
        let reserved = self
            .reservations
            .values()
            .filter(|r| r.sector == sector)
            .count() as u32;
        self.per_sector.get(sector).copied().unwrap_or(0) + reserved
    }

    /// Signals counted in the minute bucket containing `now`.
    pub fn signals_this_minute(&self, now: DateTime<Utc>) -> u32 {
        self.flood.get(&flood_bucket(now), now).copied().unwrap_or(0)
    }

    pub fn duplicate_remaining(&self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.duplicate.remaining(key, now)
    }

    pub fn correlation_remaining(&self, group: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.correlation.remaining(group, now)
    }

    pub fn strategy_cooldown_remaining(&self, strategy: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.strategy_failures.remaining(strategy, now)
    }

    pub fn volatility_remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.volatility.remaining(symbol, now)
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            daily_loss: self.daily_loss,
            weekly_loss: self.weekly_loss,
            monthly_loss: self.monthly_loss,
            daily_risk: self.daily_risk,
            equity: self.equity,
            equity_peak: self.equity_peak,
            trades_today: self.trade_count,
            open_positions: self.open_positions,
            reserved: self.reservations.len(),
            consecutive_losses: self.consecutive_losses,
            signal_count: self.signal_count,
            wins: self.wins,
            losses: self.losses,
            paused: self.pause.is_paused(),
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn snapshot(&self, now: DateTime<Utc>) -> LedgerSnapshot {
        LedgerSnapshot {
            taken_at: now,
            period: self.period,
            daily_loss: self.daily_loss,
            weekly_loss: self.weekly_loss,
            monthly_loss: self.monthly_loss,
            daily_risk: self.daily_risk,
            equity: self.equity,
            equity_peak: self.equity_peak,
            trade_count: self.trade_count,
            per_instrument: self.per_instrument.clone().into_iter().collect(),
            per_sector: self.per_sector.clone().into_iter().collect(),
            consecutive_losses: self.consecutive_losses,
            signal_count: self.signal_count,
            wins: self.wins,
            losses: self.losses,
            paused: self.pause.reason(),
            duplicate_window: self.duplicate.active_entries(now),
            correlation_window: self.correlation.active_entries(now),
            strategy_window: self.strategy_failures.active_entries(now),
        }
    }

    /// Load a snapshot. Counters are only taken for periods that are still current.
    ///
    /// Returns `true` when the snapshot belonged to today and daily state was restored.
    pub fn restore(&mut self, snapshot: LedgerSnapshot, now: DateTime<Utc>) -> bool {
        let current = self.calendar.period_key(now);
        self.period = current;
        self.equity = snapshot.equity;
        self.equity_peak = snapshot.equity_peak.max(snapshot.equity);

        if snapshot.period.month == current.month {
            self.monthly_loss = snapshot.monthly_loss;
        }
        if snapshot.period.week == current.week {
            self.weekly_loss = snapshot.weekly_loss;
        }
        if snapshot.period.day != current.day {
            info!(
                snapshot_day = %snapshot.period.day,
                today = %current.day,
                "Ledger snapshot from a previous day, daily state discarded"
            );
            return false;
        }

        self.daily_loss = snapshot.daily_loss;
        self.daily_risk = snapshot.daily_risk;
        self.trade_count = snapshot.trade_count;
        self.per_instrument = snapshot.per_instrument.into_iter().collect();
        self.per_sector = snapshot.per_sector.into_iter().collect();
        self.consecutive_losses = snapshot.consecutive_losses;
        self.signal_count = snapshot.signal_count;
        self.wins = snapshot.wins;
        self.losses = snapshot.losses;
        for (key, at) in snapshot.duplicate_window {
            self.duplicate.touch(key, at);
        }
        for (key, at) in snapshot.correlation_window {
            self.correlation.touch(key, at);
        }
        for (key, at) in snapshot.strategy_window {
            self.strategy_failures.touch(key, at);
        }
        if let Some(reason) = snapshot.paused {
            self.pause.trigger_at(reason, snapshot.taken_at);
        }
        Metrics::ledger_paused(self.pause.is_paused());
        Metrics::daily_loss(self.daily_loss.to_f64().unwrap_or_default());
        Metrics::equity(self.equity.to_f64().unwrap_or_default());

        info!(stats = %self.stats(), "Ledger restored from snapshot");
        true
    }
}

fn secs(s: u64) -> Duration {
    Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX / 1000))
}

fn flood_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(FLOOD_BUCKET_SECS)
}

// ============================================================================
// LedgerHandle
// ============================================================================

/// Shared, mutex-guarded ledger.
///
/// Cloning shares the same ledger. All recording operations go through
/// this handle so that they serialize with gate evaluations.
#[derive(Clone)]
pub struct LedgerHandle {
    inner: Arc<Mutex<RiskLedger>>,
    pause: Arc<PauseLatch>,
}

impl LedgerHandle {
    pub fn new(ledger: RiskLedger) -> Self {
        let pause = ledger.pause_latch();
        Self {
            inner: Arc::new(Mutex::new(ledger)),
            pause,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RiskLedger> {
        self.inner.lock()
    }

    /// Lock-free pause check.
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn reset_if_period_rolled(&self, now: DateTime<Utc>) -> bool {
        self.inner.lock().reset_if_period_rolled(now)
    }

    pub fn record_signal_seen(&self, now: DateTime<Utc>) {
        self.inner.lock().record_signal_seen(now);
    }

    pub fn record_execution(&self, signal: &Signal, risk: Decimal) {
        self.inner.lock().record_execution(signal, risk);
    }

    pub fn release_reservation(&self, signal_id: &SignalId) -> bool {
        self.inner.lock().release_reservation(signal_id)
    }

    pub fn reserved_risk(&self, signal_id: &SignalId) -> Option<Decimal> {
        self.inner.lock().reserved_risk(signal_id)
    }

    pub fn rollback_admission(&self, signal: &Signal) {
        self.inner.lock().rollback_admission(signal);
    }

    pub fn release_position(&self, symbol: &str) {
        self.inner.lock().release_position(symbol);
    }

    pub fn record_result(
        &self,
        pnl: Decimal,
        risk_taken: Decimal,
        symbol: &str,
        sector: &str,
        strategy: &str,
        now: DateTime<Utc>,
    ) {
        self.inner
            .lock()
            .record_result(pnl, risk_taken, symbol, sector, strategy, now);
    }

    pub fn record_strategy_failure(&self, strategy: &str, now: DateTime<Utc>) {
        self.inner.lock().record_strategy_failure(strategy, now);
    }

    pub fn pause(&self, reason: PauseReason) -> bool {
        self.inner.lock().pause(reason)
    }

    pub fn resume(&self) {
        self.inner.lock().resume();
    }

    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.inner.lock().evict_expired(now)
    }

    pub fn stats(&self) -> LedgerStats {
        self.inner.lock().stats()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> LedgerSnapshot {
        self.inner.lock().snapshot(now)
    }

    pub fn restore(&self, snapshot: LedgerSnapshot, now: DateTime<Utc>) -> bool {
        self.inner.lock().restore(snapshot, now)
    }
}

impl fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reservation_counts_toward_caps() {
        let mut ledger = ledger_with(RiskLimits::default());
        let s = signal("INFY", "IT", "orb");
        ledger.record_admission(&s, market_open(), false, s.risk_amount(s.quantity));

        assert_eq!(ledger.committed_trades(), 1);
        assert_eq!(ledger.committed_for_instrument("INFY"), 1);
        assert_eq!(ledger.committed_for_sector("IT"), 1);
        assert_eq!(ledger.committed_risk(), dec!(50));

        ledger.record_execution(&s, dec!(40));
        assert_eq!(ledger.committed_trades(), 1);
        assert_eq!(ledger.committed_risk(), dec!(40));
        assert_eq!(ledger.stats().open_positions, 1);
    }

    #[test]
    fn test_risk_headroom_counts_reservations() {
        let mut ledger = ledger_with(RiskLimits {
            max_daily_risk: dec!(1500),
            ..Default::default()
        });
        let s = signal("INFY", "IT", "orb");
        ledger.record_admission(&s, market_open(), false, dec!(1000));
        assert_eq!(ledger.reserved_risk(&s.id), Some(dec!(1000)));
        assert_eq!(ledger.risk_headroom(), Some(dec!(500)));

        ledger.record_execution(&s, dec!(800));
        assert_eq!(ledger.reserved_risk(&s.id), None);
        assert_eq!(ledger.risk_headroom(), Some(dec!(700)));

        let uncapped = ledger_with(RiskLimits {
            max_daily_risk: Decimal::ZERO,
            ..Default::default()
        });
        assert_eq!(uncapped.risk_headroom(), None);
    }

    #[test]
    fn test_release_returns_capacity() {
        let mut ledger = ledger_with(RiskLimits::default());
        let s = signal("INFY", "IT", "orb");
        ledger.record_admission(&s, market_open(), false, s.risk_amount(s.quantity));
        assert!(ledger.release_reservation(&s.id));
        assert!(!ledger.release_reservation(&s.id));
        assert_eq!(ledger.committed_trades(), 0);
        // Windows stay armed after release.
        assert!(ledger
            .duplicate_remaining(&s.dedupe_key(), market_open())
            .is_some());
    }

    #[test]
    fn test_rollback_clears_windows() {
        let mut ledger = ledger_with(RiskLimits::default());
        let s = signal("INFY", "IT", "orb");
        ledger.record_admission(&s, market_open(), false, s.risk_amount(s.quantity));
        ledger.rollback_admission(&s);

        assert_eq!(ledger.committed_trades(), 0);
        assert!(ledger
            .duplicate_remaining(&s.dedupe_key(), market_open())
            .is_none());
        assert!(ledger.correlation_remaining("IT", market_open()).is_none());
    }

    #[test]
    fn test_daily_loss_trips_pause() {
        let mut ledger = ledger_with(RiskLimits {
            max_daily_loss: dec!(1000),
            ..Default::default()
        });
        ledger.record_result(dec!(-600), dec!(500), "INFY", "IT", "orb", market_open());
        assert!(!ledger.is_paused());
        ledger.record_result(dec!(-400), dec!(500), "TCS", "IT", "orb", market_open());
        assert!(ledger.is_paused());
        assert!(matches!(
            ledger.pause_reason(),
            Some(PauseReason::DailyLoss { .. })
        ));
        assert_eq!(ledger.consecutive_losses(), 2);
    }

    #[test]
    fn test_drawdown_trips_pause() {
        let mut ledger = ledger_with(RiskLimits {
            max_daily_loss: dec!(1000000),
            max_drawdown: dec!(0.05),
            starting_equity: dec!(100000),
            ..Default::default()
        });
        ledger.record_result(dec!(10000), dec!(500), "INFY", "IT", "orb", market_open());
        assert_eq!(ledger.equity_peak(), dec!(110000));
        ledger.record_result(dec!(-6000), dec!(500), "INFY", "IT", "orb", market_open());
        assert!(ledger.is_paused());
        assert!(matches!(
            ledger.pause_reason(),
            Some(PauseReason::Drawdown { .. })
        ));
    }

    #[test]
    fn test_win_resets_streak_and_loss_arms_strategy_cooldown() {
        let mut ledger = ledger_with(RiskLimits::default());
        let now = market_open();
        ledger.record_result(dec!(-100), dec!(100), "INFY", "IT", "orb", now);
        assert_eq!(ledger.consecutive_losses(), 1);
        assert!(ledger.strategy_cooldown_remaining("orb", now).is_some());

        ledger.record_result(dec!(250), dec!(100), "INFY", "IT", "vwap", now);
        assert_eq!(ledger.consecutive_losses(), 0);
        assert!(ledger.strategy_cooldown_remaining("vwap", now).is_none());
    }

    #[test]
    fn test_day_rollover_resets_daily_and_keeps_weekly() {
        let mut ledger = ledger_with(RiskLimits {
            max_daily_loss: dec!(100),
            ..Default::default()
        });
        let now = market_open();
        ledger.record_result(dec!(-150), dec!(100), "INFY", "IT", "orb", now);
        ledger.record_signal_seen(now);
        assert!(ledger.is_paused());

        assert!(!ledger.reset_if_period_rolled(now + Duration::hours(2)));
        assert!(ledger.reset_if_period_rolled(now + Duration::days(1)));
        assert!(!ledger.is_paused());
        assert_eq!(ledger.daily_loss(), Decimal::ZERO);
        assert_eq!(ledger.signal_count(), 0);
        // Thursday is the same ISO week.
        assert_eq!(ledger.weekly_loss(), dec!(150));
    }

    #[test]
    fn test_week_rollover_resets_weekly() {
        let mut ledger = ledger_with(RiskLimits::default());
        let now = market_open();
        ledger.record_result(dec!(-150), dec!(100), "INFY", "IT", "orb", now);
        // Following Monday.
        ledger.reset_if_period_rolled(now + Duration::days(5));
        assert_eq!(ledger.weekly_loss(), Decimal::ZERO);
        assert_eq!(ledger.monthly_loss(), dec!(150));
    }

    #[test]
    fn test_flood_bucket_counts_per_minute() {
        let mut ledger = ledger_with(RiskLimits::default());
        let now = market_open();
        ledger.record_signal_seen(now);
        ledger.record_signal_seen(now + Duration::seconds(30));
        assert_eq!(ledger.signals_this_minute(now + Duration::seconds(59)), 2);
        assert_eq!(ledger.signals_this_minute(now + Duration::seconds(61)), 0);
    }

    #[test]
    fn test_snapshot_restore_same_day() {
        let mut ledger = ledger_with(RiskLimits {
            max_daily_loss: dec!(100),
            ..Default::default()
        });
        let now = market_open();
        let s = signal("INFY", "IT", "orb");
        ledger.record_admission(&s, now, false, s.risk_amount(s.quantity));
        ledger.record_execution(&s, dec!(50));
        ledger.record_result(dec!(-150), dec!(50), "INFY", "IT", "orb", now);
        let snap = ledger.snapshot(now);

        let json = serde_json::to_string(&snap).unwrap();
        let parsed: LedgerSnapshot = serde_json::from_str(&json).unwrap();

        let mut fresh = ledger_with(RiskLimits::default());
        assert!(fresh.restore(parsed, now + Duration::minutes(10)));
        assert_eq!(fresh.daily_loss(), dec!(150));
        assert_eq!(fresh.committed_for_instrument("INFY"), 1);
        assert!(fresh.is_paused());
        assert!(fresh
            .duplicate_remaining(&s.dedupe_key(), now + Duration::minutes(1))
            .is_some());
    }

    #[test]
    fn test_snapshot_from_previous_day_discards_daily_state() {
        let mut ledger = ledger_with(RiskLimits::default());
        let now = market_open();
        ledger.record_result(dec!(-150), dec!(50), "INFY", "IT", "orb", now);
        let snap = ledger.snapshot(now);

        let mut fresh = ledger_with(RiskLimits::default());
        assert!(!fresh.restore(snap, now + Duration::days(1)));
        assert_eq!(fresh.daily_loss(), Decimal::ZERO);
        assert_eq!(fresh.weekly_loss(), dec!(150));
        assert_eq!(fresh.equity(), dec!(99850));
    }

    #[test]
    fn test_manual_pause_and_resume() {
        let handle = LedgerHandle::new(ledger_with(RiskLimits::default()));
        assert!(handle.pause(PauseReason::Manual {
            message: "news".to_string()
        }));
        assert!(handle.is_paused());
        handle.resume();
        assert!(!handle.is_paused());
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("sigex-ledger-{}", SignalId::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ledger.json");
        assert!(LedgerSnapshot::load(&path).unwrap().is_none());

        let mut ledger = ledger_with(RiskLimits::default());
        ledger.record_result(dec!(-75), dec!(50), "INFY", "IT", "orb", market_open());
        let snap = ledger.snapshot(market_open());
        snap.save(&path).unwrap();

        let loaded = LedgerSnapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded, snap);

        std::fs::write(&path, "  ").unwrap();
        assert!(matches!(
            LedgerSnapshot::load(&path),
            Err(RiskError::Snapshot(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
