//! Signal-to-bracket execution pipeline.
//!
//! # Flow
//!
//! 1. `AdmissionGate::evaluate` (reserves ledger capacity on accept)
//! 2. `MarginPrecheck::can_afford` and `PositionSizer::size`
//! 3. Paper mode stops here and releases the reservation
//! 4. Entry leg placed and watched until filled, rejected or timed out
//! 5. Ledger records the execution, stop and target legs are placed
//! 6. A spawned task races the two exit legs and records the result
//!
//! Failures that never reached the broker roll the admission back. The
//! recoverable ones (margin shortfall, transient broker errors) are handed
//! to the `RetryQueue`. If an exit leg cannot be placed after the entry
//! filled, the position is flattened at market and booked as a full stop
//! loss.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sigex_broker::BrokerConfig;
use sigex_core::{
    BracketStatus, BracketTrade, FillOutcome, LegStatus, OrderLeg, Price, RejectReason, Signal, TradeId,
    Verdict,
};
use sigex_risk::{AdmissionGate, LedgerHandle};
use sigex_telemetry::Metrics;

use crate::bracket::{BracketMonitor, BracketOutcome, SiblingCancel};
use crate::clock::{Clock, SystemClock};
use crate::config::{ExecutionConfig, RetryConfig, SizingConfig};
use crate::context::MarketContextProvider;
use crate::error::ExecutorError;
use crate::margin::MarginPrecheck;
use crate::open_trades::OpenTrades;
use crate::order_executor::OrderExecutor;
use crate::retry::RetryQueue;
use crate::sizer::PositionSizer;
use crate::sweeper::OrderTracker;

/// Per-submission switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Queue recoverable failures for a later attempt.
    pub retry_on_fail: bool,
    /// `false` runs admission and sizing only.
    pub live: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            retry_on_fail: true,
            live: true,
        }
    }
}

/// What `process` did with a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rejected {
        reason: RejectReason,
        detail: String,
        queued: bool,
    },
    /// Sized but not sent.
    Paper { quantity: u32 },
    /// Entry placed but not filled; an open entry is left resting.
    EntryNotFilled {
        order_id: String,
        outcome: FillOutcome,
    },
    /// Bracket live and monitored.
    Opened { trade_id: TradeId, quantity: u32 },
    /// Exit legs could not be placed; the position was sent a market exit.
    Flattened { order_id: String },
    Failed {
        detail: String,
        transient: bool,
        queued: bool,
    },
}

impl ExecutionOutcome {
    /// Whether a queued retry of this signal is finished. Anything another
    /// attempt cannot change ends it: a placed trade, or a permanent refusal.
    pub fn ends_retry(&self) -> bool {
        match self {
            Self::Opened { .. }
            | Self::Paper { .. }
            | Self::EntryNotFilled { .. }
            | Self::Flattened { .. } => true,
            Self::Rejected { reason, .. } => !reason.is_retryable(),
            Self::Failed { transient, .. } => !transient,
        }
    }

    fn is_placed(&self) -> bool {
        !matches!(self, Self::Rejected { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason, detail, .. } => write!(f, "rejected {reason}: {detail}"),
            Self::Paper { quantity } => write!(f, "paper qty={quantity}"),
            Self::EntryNotFilled { order_id, outcome } => {
                write!(f, "entry {order_id} not filled: {outcome:?}")
            }
            Self::Opened { trade_id, quantity } => write!(f, "opened {trade_id} qty={quantity}"),
            Self::Flattened { order_id } => write!(f, "flattened via {order_id}"),
            Self::Failed { detail, .. } => write!(f, "failed: {detail}"),
        }
    }
}

/// Config bundle for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub execution: ExecutionConfig,
    pub sizing: SizingConfig,
    pub retry: RetryConfig,
}

pub struct ExecutionEngine {
    config: ExecutionConfig,
    gate: AdmissionGate,
    ledger: LedgerHandle,
    executor: Arc<OrderExecutor>,
    brackets: BracketMonitor,
    margin: MarginPrecheck,
    sizer: PositionSizer,
    retry: Arc<RetryQueue>,
    tracker: Arc<OrderTracker>,
    open_trades: Arc<OpenTrades>,
    context: Arc<dyn MarketContextProvider>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(
        gate: AdmissionGate,
        executor: Arc<OrderExecutor>,
        broker_config: &BrokerConfig,
        settings: EngineSettings,
        context: Arc<dyn MarketContextProvider>,
    ) -> Self {
        let gate = gate.with_unsized_trade_risk(settings.sizing.risk_per_trade);
        let ledger = gate.ledger().clone();
        let margin = MarginPrecheck::new(executor.clone(), broker_config, &settings.execution);
        info!(
            mode = ?settings.execution.mode,
            entry_kind = %settings.execution.entry_order_kind,
            risk_per_trade = %settings.sizing.risk_per_trade,
            "Execution engine ready"
        );
        Self {
            brackets: BracketMonitor::new(executor.clone()),
            sizer: PositionSizer::new(settings.sizing),
            retry: Arc::new(RetryQueue::new(settings.retry)),
            tracker: Arc::new(OrderTracker::new()),
            open_trades: Arc::new(OpenTrades::new()),
            config: settings.execution,
            gate,
            ledger,
            executor,
            margin,
            context,
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the wall clock used by `process` and the retry sweeper.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry
    }

    pub fn tracker(&self) -> &Arc<OrderTracker> {
        &self.tracker
    }

    pub fn open_trades(&self) -> &Arc<OpenTrades> {
        &self.open_trades
    }

    /// Stop every bracket monitor. Legs stay at the broker.
    pub fn shutdown(&self) {
        info!(open = self.open_trades.len(), "Stopping bracket monitors");
        self.shutdown.cancel();
    }

    pub async fn process(
        self: &Arc<Self>,
        signal: Signal,
        options: ExecutionOptions,
    ) -> ExecutionOutcome {
        let now = self.clock.now();
        self.process_at(signal, options, now).await
    }

    /// Run one signal through the pipeline with `now` as the evaluation time.
    pub async fn process_at(
        self: &Arc<Self>,
        signal: Signal,
        options: ExecutionOptions,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let ctx = self.context.context(&signal, now);

        if let Verdict::Rejected { reason, detail } = self.gate.evaluate(&signal, &ctx) {
            let queued = reason.is_retryable()
                && options.retry_on_fail
                && self
                    .retry
                    .queue_failed_signal(signal, options, reason.code(), now);
            return ExecutionOutcome::Rejected {
                reason,
                detail,
                queued,
            };
        }

        let affordability = match self.margin.can_afford(&signal, self.config.margin_sample_qty).await {
            Ok(a) => a,
            Err(e) => {
                warn!(symbol = %signal.symbol, error = %e, "Margin precheck failed");
                let transient = e.is_transient();
                let detail = format!("margin precheck: {e}");
                let queued = self.abandon(signal, options, transient, &detail, now);
                return ExecutionOutcome::Failed {
                    detail,
                    transient,
                    queued,
                };
            }
        };

        let quantity = if affordability.can_place {
            self.sizer.size(&signal, affordability.quantity)
        } else {
            0
        };
        if quantity == 0 {
            let reason = RejectReason::MarginInsufficient;
            let detail = format!(
                "available {} per unit {} affordable {}",
                affordability.available, affordability.per_unit, affordability.quantity
            );
            Metrics::signal_rejected(reason.code());
            warn!(symbol = %signal.symbol, %reason, detail = %detail, "Signal cannot be sized");
            let queued = self.abandon(signal, options, true, reason.code(), now);
            return ExecutionOutcome::Rejected {
                reason,
                detail,
                queued,
            };
        }
        let budgeted = self.fit_reserved_risk(&signal, quantity);
        if budgeted == 0 {
            let reason = RejectReason::DailyRiskLimit;
            let detail = format!("reserved risk cannot cover one unit of {quantity}");
            Metrics::signal_rejected(reason.code());
            warn!(symbol = %signal.symbol, %reason, detail = %detail, "Signal cannot be sized");
            let queued = self.abandon(signal, options, false, reason.code(), now);
            return ExecutionOutcome::Rejected {
                reason,
                detail,
                queued,
            };
        }
        if budgeted < quantity {
            info!(
                symbol = %signal.symbol,
                sized = quantity,
                quantity = budgeted,
                "Quantity reduced to the reserved daily risk"
            );
        }
        let quantity = budgeted;
        let sized = signal.with_quantity(quantity);

        if !options.live || self.config.is_paper() {
            self.ledger.release_reservation(&sized.id);
            info!(
                symbol = %sized.symbol,
                direction = %sized.direction,
                quantity,
                entry = %sized.entry,
                stop = %sized.stop_loss,
                target = %sized.target1,
                "Paper trade, no orders sent"
            );
            return ExecutionOutcome::Paper { quantity };
        }

        let mut entry = OrderLeg::entry(&sized, self.config.entry_order_kind);
        if let Err(e) = self.executor.place_order(&mut entry).await {
            let transient = e.is_transient();
            if !transient {
                self.ledger
                    .record_strategy_failure(&sized.meta.strategy, elapsed_from(now, started));
            }
            let detail = e.to_string();
            let queued = self.abandon(sized, options, transient, &detail, now);
            return ExecutionOutcome::Failed {
                detail,
                transient,
                queued,
            };
        }

        let entry_id = entry.order_id().to_string();
        self.tracker.track(&entry, elapsed_from(now, started));
        let fill = self
            .executor
            .monitor_order(&entry_id, self.config.entry_fill_timeout(), self.config.poll_interval())
            .await;

        let entry_price = match fill {
            FillOutcome::Filled { average_price } => {
                self.tracker.untrack(&entry_id);
                entry.status = LegStatus::Complete;
                average_price.unwrap_or(sized.entry)
            }
            FillOutcome::Rejected { .. } => {
                self.tracker.untrack(&entry_id);
                entry.status = LegStatus::Rejected;
                self.ledger.release_reservation(&sized.id);
                self.ledger
                    .record_strategy_failure(&sized.meta.strategy, elapsed_from(now, started));
                return ExecutionOutcome::EntryNotFilled {
                    order_id: entry_id,
                    outcome: fill,
                };
            }
            FillOutcome::Open => {
                self.ledger.release_reservation(&sized.id);
                warn!(
                    symbol = %sized.symbol,
                    order_id = %entry_id,
                    "Entry not filled in time, left resting for the stale sweep"
                );
                return ExecutionOutcome::EntryNotFilled {
                    order_id: entry_id,
                    outcome: fill,
                };
            }
        };

        let risk = entry_price.distance_to(sized.stop_loss) * Decimal::from(quantity);
        self.ledger.record_execution(&sized, risk);

        let mut stop = OrderLeg::stop(&sized);
        let mut target = OrderLeg::target(&sized);
        let protected = match self.executor.place_order(&mut stop).await {
            Ok(_) => self.executor.place_order(&mut target).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = protected {
            return self
                .flatten_unprotected(&sized, entry_price, [&stop, &target], e, elapsed_from(now, started))
                .await;
        }

        let trade = BracketTrade::open(sized, entry, stop, target, entry_price);
        let trade_id = trade.id.clone();
        let monitor = self.shutdown.child_token();
        self.open_trades.insert(trade.clone(), monitor.clone());
        info!(
            trade_id = %trade_id,
            symbol = %trade.signal.symbol,
            direction = %trade.signal.direction,
            quantity,
            entry_price = %entry_price,
            stop_id = %trade.stop.order_id(),
            target_id = %trade.target.order_id(),
            "Bracket opened"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.watch_trade(trade, monitor, now, started).await;
        });

        ExecutionOutcome::Opened { trade_id, quantity }
    }

    /// Race the exit legs of `trade` and book the result.
    async fn watch_trade(
        &self,
        mut trade: BracketTrade,
        monitor: CancellationToken,
        now: DateTime<Utc>,
        started: Instant,
    ) {
        let mut outcome = self
            .brackets
            .monitor_bracket(
                trade.stop.order_id(),
                trade.target.order_id(),
                self.config.poll_interval(),
                self.config.bracket_deadline(),
                monitor.clone(),
            )
            .await;
        if outcome.status == BracketStatus::TimedOut {
            outcome = self.reconcile_trade(&trade, monitor).await;
        }
        let closed_at = elapsed_from(now, started);

        if outcome.sibling_cancel == SiblingCancel::Failed {
            let sibling = if outcome.sibling_id.as_deref() == Some(trade.stop.order_id()) {
                &trade.stop
            } else {
                &trade.target
            };
            self.tracker.track(sibling, closed_at);
        }

        trade.close(outcome.status, outcome.exit_price);
        self.open_trades.remove(&trade.id);
        Metrics::bracket_outcome(&trade.status.to_string());

        let symbol = trade.signal.symbol.clone();
        match trade.realized_pnl() {
            Some(pnl) => {
                self.ledger.record_result(
                    pnl,
                    trade.risk_taken(),
                    &symbol,
                    trade.signal.sector_or_unknown(),
                    &trade.signal.meta.strategy,
                    closed_at,
                );
                info!(
                    trade_id = %trade.id,
                    symbol = %symbol,
                    status = %trade.status,
                    exit_price = ?trade.exit_price,
                    pnl = %pnl,
                    "Trade closed"
                );
            }
            None => {
                self.ledger.release_position(&symbol);
                warn!(
                    trade_id = %trade.id,
                    symbol = %symbol,
                    status = %trade.status,
                    "Trade monitor ended without a fill, exit legs left at broker"
                );
            }
        }
    }

    /// Keep a timed-out bracket open and poll its resting legs at the
    /// reconcile interval. The position slot stays held until a leg fills,
    /// both legs die or the trade is closed by hand.
    async fn reconcile_trade(
        &self,
        trade: &BracketTrade,
        monitor: CancellationToken,
    ) -> BracketOutcome {
        self.open_trades.set_status(&trade.id, BracketStatus::TimedOut);
        Metrics::bracket_outcome(&BracketStatus::TimedOut.to_string());
        warn!(
            trade_id = %trade.id,
            symbol = %trade.signal.symbol,
            stop_id = %trade.stop.order_id(),
            target_id = %trade.target.order_id(),
            "Bracket deadline passed with both legs resting, reconciling"
        );
        loop {
            let outcome = self
                .brackets
                .monitor_bracket(
                    trade.stop.order_id(),
                    trade.target.order_id(),
                    self.config.reconcile_interval(),
                    self.config.bracket_deadline(),
                    monitor.clone(),
                )
                .await;
            if outcome.status != BracketStatus::TimedOut {
                return outcome;
            }
            debug!(trade_id = %trade.id, "Bracket still unresolved");
        }
    }

    /// Exit legs failed after the entry filled. Cancel what was placed,
    /// send a market exit and book the full stop distance as lost.
    async fn flatten_unprotected(
        &self,
        signal: &Signal,
        entry_price: Price,
        legs: [&OrderLeg; 2],
        cause: ExecutorError,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome {
        error!(
            symbol = %signal.symbol,
            quantity = signal.quantity,
            error = %cause,
            "Exit leg placement failed, flattening unprotected position"
        );
        for leg in legs.into_iter().filter(|l| l.status == LegStatus::Open) {
            if let Err(e) = self.executor.cancel_order(leg.order_id()).await {
                warn!(order_id = %leg.order_id(), error = %e, "Exit leg cancel failed, tracking for sweep");
                self.tracker.track(leg, now);
            }
        }

        let mut flatten = OrderLeg::flatten(signal);
        let flattened = self.executor.place_order(&mut flatten).await;

        let risk = entry_price.distance_to(signal.stop_loss) * Decimal::from(signal.quantity);
        self.ledger.record_result(
            -risk,
            risk,
            &signal.symbol,
            signal.sector_or_unknown(),
            &signal.meta.strategy,
            now,
        );
        Metrics::bracket_outcome("FLATTENED");

        match flattened {
            Ok(order_id) => ExecutionOutcome::Flattened { order_id },
            Err(e) => {
                error!(
                    symbol = %signal.symbol,
                    error = %e,
                    "Flatten failed, position needs manual attention"
                );
                ExecutionOutcome::Failed {
                    detail: format!("flatten failed after {cause}: {e}"),
                    transient: false,
                    queued: false,
                }
            }
        }
    }

    /// Largest quantity whose risk fits the admission reservation.
    fn fit_reserved_risk(&self, signal: &Signal, quantity: u32) -> u32 {
        let per_unit = signal.risk_per_unit();
        let Some(budget) = self.ledger.reserved_risk(&signal.id) else {
            return quantity;
        };
        if per_unit <= Decimal::ZERO {
            return quantity;
        }
        let units = (budget / per_unit).floor().to_u32().unwrap_or(u32::MAX);
        quantity.min(units)
    }

    /// Give back an admission that never reached the broker.
    ///
    /// Recoverable failures roll back the suppression windows so a later
    /// attempt can pass them, and are queued when the caller asked for it.
    fn abandon(
        &self,
        signal: Signal,
        options: ExecutionOptions,
        recoverable: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !recoverable {
            self.ledger.release_reservation(&signal.id);
            return false;
        }
        self.ledger.rollback_admission(&signal);
        options.retry_on_fail && self.retry.queue_failed_signal(signal, options, reason, now)
    }

    /// Re-offer every due retry item once. Returns how many were placed.
    pub async fn sweep_retries(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let due = self.retry.due_items(now);
        if due.is_empty() {
            return 0;
        }
        debug!(due = due.len(), "Retry sweep");

        let mut completed = 0;
        for item in due {
            let options = ExecutionOptions {
                retry_on_fail: false,
                ..item.options
            };
            let outcome = self.process_at(item.signal.clone(), options, now).await;
            if outcome.is_placed() {
                completed += 1;
                Metrics::retry_outcome("succeeded");
                info!(
                    signal_id = %item.signal.id,
                    symbol = %item.signal.symbol,
                    attempt = item.attempt + 1,
                    outcome = %outcome,
                    "Retry completed"
                );
            } else if outcome.ends_retry() {
                Metrics::retry_outcome("dropped");
                warn!(
                    signal_id = %item.signal.id,
                    symbol = %item.signal.symbol,
                    attempt = item.attempt + 1,
                    outcome = %outcome,
                    "Retry dropped"
                );
            } else {
                self.retry.reschedule(item, outcome.to_string(), now);
            }
        }
        completed
    }

    /// Sweep the retry queue every configured interval until `shutdown` fires.
    pub async fn run_retry_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = self.retry.config().sweep_interval();
        info!(interval_secs = interval.as_secs(), "Retry sweeper started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_retries(self.clock.now()).await;
                }
                () = shutdown.cancelled() => {
                    info!(pending = self.retry.len(), "Retry sweeper stopped");
                    return;
                }
            }
        }
    }
}

/// `now` advanced by the wall time spent since `started`.
fn elapsed_from(now: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    let elapsed = chrono::Duration::from_std(started.elapsed());
    now + elapsed.unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use sigex_broker::{BrokerError, MockBroker};
    use sigex_core::{OrderKind, OrderSide, SessionCalendar};
    use sigex_risk::{GateConfig, MemoryAuditSink, RiskLedger, RiskLimits};

    use crate::clock::ManualClock;
    use crate::context::StaticContextProvider;
    use crate::test_support::{fast_config, market_open, signal};

    struct Fixture {
        broker: Arc<MockBroker>,
        engine: Arc<ExecutionEngine>,
    }

    fn fixture_with(execution: ExecutionConfig) -> Fixture {
        fixture_with_clock(execution, Arc::new(SystemClock))
    }

    fn fixture_with_clock(execution: ExecutionConfig, clock: Arc<dyn Clock>) -> Fixture {
        build_fixture(execution, RiskLimits::default(), clock)
    }

    fn fixture_with_limits(limits: RiskLimits) -> Fixture {
        build_fixture(fast_config(), limits, Arc::new(SystemClock))
    }

    fn build_fixture(
        execution: ExecutionConfig,
        limits: RiskLimits,
        clock: Arc<dyn Clock>,
    ) -> Fixture {
        let broker = Arc::new(MockBroker::new());
        broker.set_margins(dec!(1000000), dec!(100));

        let calendar = Arc::new(SessionCalendar::indian_equities());
        let gates = GateConfig::default();
        let ledger = LedgerHandle::new(RiskLedger::new(
            limits,
            &gates,
            calendar.clone(),
            market_open(),
        ));
        let gate = AdmissionGate::new(gates, calendar, ledger, Arc::new(MemoryAuditSink::new()));
        let broker_config = BrokerConfig::default();
        let executor = Arc::new(OrderExecutor::new(broker.clone(), &broker_config, &execution));
        let engine = ExecutionEngine::new(
            gate,
            executor,
            &broker_config,
            EngineSettings {
                execution,
                ..Default::default()
            },
            Arc::new(StaticContextProvider::default()),
        )
        .with_clock(clock);
        Fixture {
            broker,
            engine: Arc::new(engine),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(fast_config())
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn open_trade(f: &Fixture) -> TradeId {
        // Entry is MOCK-1, stop MOCK-2, target MOCK-3.
        f.broker
            .script_statuses("MOCK-1", &[LegStatus::Open, LegStatus::Complete]);
        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;
        match outcome {
            ExecutionOutcome::Opened { trade_id, quantity } => {
                assert_eq!(quantity, 10);
                trade_id
            }
            other => panic!("expected an open trade, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_target_win_books_profit_and_cancels_stop() {
        let f = fixture();
        open_trade(&f).await;
        assert_eq!(f.engine.ledger().stats().open_positions, 1);

        f.broker.set_status("MOCK-3", LegStatus::Complete);
        wait_until(|| f.engine.open_trades().is_empty()).await;

        let stats = f.engine.ledger().stats();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.open_positions, 0);
        assert_eq!(stats.equity, dec!(100180));
        assert_eq!(f.broker.cancels(), vec!["MOCK-2".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_loss_books_loss() {
        let f = fixture();
        open_trade(&f).await;

        f.broker.set_status("MOCK-2", LegStatus::Complete);
        wait_until(|| f.engine.open_trades().is_empty()).await;

        let stats = f.engine.ledger().stats();
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.daily_loss, dec!(50));
        assert_eq!(f.broker.cancel_count("MOCK-3"), 1);
    }

    #[tokio::test]
    async fn test_external_close_frees_slot_without_result() {
        let f = fixture();
        let trade_id = open_trade(&f).await;

        assert!(f.engine.open_trades().close_externally(&trade_id));
        wait_until(|| f.engine.open_trades().is_empty()).await;

        let stats = f.engine.ledger().stats();
        assert_eq!(stats.open_positions, 0);
        assert_eq!(stats.wins + stats.losses, 0);
        assert!(f.broker.cancels().is_empty());
    }

    #[tokio::test]
    async fn test_daily_risk_cap_limits_unsized_signals() {
        let f = fixture_with_limits(RiskLimits {
            max_daily_risk: dec!(1500),
            ..Default::default()
        });
        f.broker.script_statuses("MOCK-1", &[LegStatus::Complete]);
        f.broker.script_statuses("MOCK-4", &[LegStatus::Complete]);

        // Both signals leave sizing to the engine: 1000 risk / 5 per unit.
        let mut first = signal("INFY");
        first.quantity = 0;
        let outcome = f
            .engine
            .process_at(first, ExecutionOptions::default(), market_open())
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Opened { quantity: 200, .. }));

        let mut second = signal("TCS");
        second.quantity = 0;
        second.meta.strategy = "vwap".to_string();
        let outcome = f
            .engine
            .process_at(second, ExecutionOptions::default(), market_open())
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Opened { quantity: 100, .. }));

        let stats = f.engine.ledger().stats();
        assert_eq!(stats.daily_risk, dec!(1500));
        assert_eq!(stats.open_positions, 2);

        let mut third = signal("HDFCBANK");
        third.quantity = 0;
        third.meta.strategy = "pullback".to_string();
        let outcome = f
            .engine
            .process_at(third, ExecutionOptions::default(), market_open())
            .await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Rejected {
                reason: RejectReason::DailyRiskLimit,
                queued: false,
                ..
            }
        ));
        assert_eq!(f.engine.ledger().stats().daily_risk, dec!(1500));
    }

    #[tokio::test]
    async fn test_timed_out_bracket_keeps_slot_until_leg_fills() {
        let f = fixture_with(ExecutionConfig {
            bracket_deadline_secs: 1,
            reconcile_interval_ms: 5,
            ..fast_config()
        });
        let trade_id = open_trade(&f).await;

        tokio::time::sleep(Duration::from_millis(1300)).await;
        let trade = f.engine.open_trades().get(&trade_id).unwrap();
        assert_eq!(trade.status, BracketStatus::TimedOut);
        let stats = f.engine.ledger().stats();
        assert_eq!(stats.open_positions, 1);
        assert_eq!(stats.wins + stats.losses, 0);

        f.broker.set_status("MOCK-2", LegStatus::Complete);
        wait_until(|| f.engine.open_trades().is_empty()).await;

        let stats = f.engine.ledger().stats();
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.daily_loss, dec!(50));
        assert_eq!(stats.open_positions, 0);
        assert_eq!(f.broker.cancel_count("MOCK-3"), 1);
    }

    #[tokio::test]
    async fn test_paper_mode_places_nothing() {
        let f = fixture_with(ExecutionConfig {
            mode: crate::config::TradingMode::Paper,
            ..fast_config()
        });
        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;

        assert_eq!(outcome, ExecutionOutcome::Paper { quantity: 10 });
        assert!(f.broker.placed().is_empty());
        let stats = f.engine.ledger().stats();
        assert_eq!(stats.reserved, 0);
        assert_eq!(stats.trades_today, 0);
    }

    #[tokio::test]
    async fn test_margin_shortfall_is_queued_and_rolled_back() {
        let f = fixture();
        f.broker.set_margins(dec!(500), dec!(1000));

        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Rejected {
                reason: RejectReason::MarginInsufficient,
                queued: true,
                ..
            }
        ));
        assert_eq!(f.engine.retry_queue().len(), 1);
        assert_eq!(f.engine.ledger().stats().reserved, 0);

        // Same dedupe key again: the rolled-back window lets it through to margin.
        let again = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;
        assert!(matches!(
            again,
            ExecutionOutcome::Rejected {
                reason: RejectReason::MarginInsufficient,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_retry_sweep_completes_once_margin_frees_up() {
        let f = fixture_with(ExecutionConfig {
            mode: crate::config::TradingMode::Paper,
            ..fast_config()
        });
        f.broker.set_margins(dec!(500), dec!(1000));
        f.engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;

        // Not due yet.
        let early = market_open() + chrono::Duration::seconds(30);
        assert_eq!(f.engine.sweep_retries(early).await, 0);
        assert_eq!(f.engine.retry_queue().len(), 1);

        // Still short: rescheduled with attempt 1.
        let due = market_open() + chrono::Duration::seconds(60);
        assert_eq!(f.engine.sweep_retries(due).await, 0);
        let items = f.engine.retry_queue().items();
        assert_eq!(items[0].attempt, 1);

        f.broker.set_margins(dec!(1000000), dec!(100));
        let later = items[0].next_attempt_at;
        assert_eq!(f.engine.sweep_retries(later).await, 1);
        assert!(f.engine.retry_queue().is_empty());
    }

    #[tokio::test]
    async fn test_retry_sweep_drops_expired_signal() {
        let f = fixture();
        f.broker.set_margins(dec!(500), dec!(1000));
        let mut short_lived = signal("INFY");
        short_lived.expires_at = Some(market_open() + chrono::Duration::seconds(30));
        f.engine
            .process_at(short_lived, ExecutionOptions::default(), market_open())
            .await;
        assert_eq!(f.engine.retry_queue().len(), 1);

        let due = market_open() + chrono::Duration::seconds(60);
        assert_eq!(f.engine.sweep_retries(due).await, 0);
        assert!(f.engine.retry_queue().is_empty());
        assert_eq!(f.engine.ledger().stats().reserved, 0);
    }

    #[test]
    fn test_permanent_failures_end_retry() {
        let rejected = |reason| ExecutionOutcome::Rejected {
            reason,
            detail: String::new(),
            queued: false,
        };
        let failed = |transient| ExecutionOutcome::Failed {
            detail: String::new(),
            transient,
            queued: false,
        };
        assert!(!rejected(RejectReason::MarginInsufficient).ends_retry());
        assert!(rejected(RejectReason::SignalExpired).ends_retry());
        assert!(rejected(RejectReason::DailyRiskLimit).ends_retry());
        assert!(!failed(true).ends_retry());
        assert!(failed(false).ends_retry());
        assert!(ExecutionOutcome::Paper { quantity: 1 }.ends_retry());
    }

    #[tokio::test]
    async fn test_rejected_entry_arms_strategy_cooldown() {
        let f = fixture();
        f.broker.script_statuses("MOCK-1", &[LegStatus::Rejected]);

        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;
        assert!(matches!(outcome, ExecutionOutcome::EntryNotFilled { .. }));
        assert_eq!(f.engine.ledger().stats().reserved, 0);

        let other = f
            .engine
            .process_at(signal("TCS"), ExecutionOptions::default(), market_open())
            .await;
        assert!(matches!(
            other,
            ExecutionOutcome::Rejected {
                reason: RejectReason::StrategyCooldown,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unfilled_entry_is_left_for_sweeper() {
        let f = fixture_with(ExecutionConfig {
            entry_fill_timeout_secs: 1,
            ..fast_config()
        });
        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;

        assert!(matches!(
            outcome,
            ExecutionOutcome::EntryNotFilled {
                outcome: FillOutcome::Open,
                ..
            }
        ));
        assert!(f.engine.tracker().contains("MOCK-1"));
        assert_eq!(f.engine.ledger().stats().reserved, 0);
    }

    #[tokio::test]
    async fn test_stop_leg_failure_flattens() {
        let f = fixture();
        f.broker
            .fail_kind(OrderKind::StopLossMarket, BrokerError::Rejected("RMS block".into()));
        f.broker.script_statuses("MOCK-1", &[LegStatus::Complete]);

        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Flattened {
                order_id: "MOCK-2".to_string()
            }
        );
        let placed = f.broker.placed();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].1.kind, OrderKind::Market);
        assert_eq!(placed[1].1.side, OrderSide::Sell);
        assert_eq!(placed[1].1.quantity, 10);

        let stats = f.engine.ledger().stats();
        assert_eq!(stats.daily_loss, dec!(50));
        assert_eq!(stats.open_positions, 0);
    }

    #[tokio::test]
    async fn test_target_leg_failure_cancels_stop_then_flattens() {
        let f = fixture_with(ExecutionConfig {
            entry_order_kind: OrderKind::Market,
            ..fast_config()
        });
        f.broker
            .fail_kind(OrderKind::Limit, BrokerError::Rejected("price band".into()));
        f.broker.script_statuses("MOCK-1", &[LegStatus::Complete]);

        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;

        // Stop went out as MOCK-2, so the market exit is MOCK-3.
        assert_eq!(
            outcome,
            ExecutionOutcome::Flattened {
                order_id: "MOCK-3".to_string()
            }
        );
        assert_eq!(f.broker.cancels(), vec!["MOCK-2".to_string()]);
        assert_eq!(f.broker.status_of("MOCK-2"), Some(LegStatus::Cancelled));
        assert!(f.engine.open_trades().is_empty());
    }

    #[tokio::test]
    async fn test_transient_entry_failure_is_queued() {
        let f = fixture_with(ExecutionConfig {
            place_retries: 0,
            ..fast_config()
        });
        f.broker.fail_next_place(BrokerError::Timeout);

        let outcome = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;

        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed {
                transient: true,
                queued: true,
                ..
            }
        ));
        assert_eq!(f.engine.retry_queue().len(), 1);
        let stats = f.engine.ledger().stats();
        assert_eq!(stats.reserved, 0);
    }

    #[tokio::test]
    async fn test_gate_rejection_is_not_queued() {
        let f = fixture_with(ExecutionConfig {
            mode: crate::config::TradingMode::Paper,
            ..fast_config()
        });
        f.engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;
        let second = f
            .engine
            .process_at(signal("INFY"), ExecutionOptions::default(), market_open())
            .await;

        assert!(matches!(
            second,
            ExecutionOutcome::Rejected {
                reason: RejectReason::DuplicateWindow,
                queued: false,
                ..
            }
        ));
        assert!(f.engine.retry_queue().is_empty());
    }

    #[tokio::test]
    async fn test_process_reads_engine_clock() {
        // Saturday: the session calendar blocks entries.
        let saturday = market_open() + chrono::Duration::days(3);
        let clock = Arc::new(ManualClock::new(saturday));
        let f = fixture_with_clock(
            ExecutionConfig {
                mode: crate::config::TradingMode::Paper,
                ..fast_config()
            },
            clock.clone(),
        );

        let outcome = f.engine.process(signal("INFY"), ExecutionOptions::default()).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Rejected {
                reason: RejectReason::TimingBlocked,
                ..
            }
        ));

        clock.set(market_open());
        let outcome = f.engine.process(signal("INFY"), ExecutionOptions::default()).await;
        assert_eq!(outcome, ExecutionOutcome::Paper { quantity: 10 });
    }
}
