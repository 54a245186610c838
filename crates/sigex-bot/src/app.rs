//! Main application orchestration.
//!
//! Coordinates:
//! - Signal intake (newline-delimited JSON) and bounded concurrent execution
//! - Ledger period rollover and suppression-window eviction
//! - Retry and stale-order sweeps
//! - Periodic session summaries and ledger snapshots
//! - Graceful shutdown on Ctrl-C or an external cancellation

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sigex_broker::{DynBroker, MockBroker, RestBroker, SourceTokenProvider};
use sigex_core::{SessionCalendar, Signal};
use sigex_executor::{
    Clock, ExecutionEngine, ExecutionOptions, ExecutionOutcome, OrderExecutor,
    StaleOrderSweeper, StaticContextProvider, SystemClock,
};
use sigex_risk::{AdmissionGate, LedgerHandle, LedgerSnapshot, RiskLedger, TracingAuditSink};
use sigex_telemetry::SessionSummaryReporter;

use crate::config::{AppConfig, BrokerBackend};
use crate::error::AppResult;

/// Main application.
pub struct Application {
    config: AppConfig,
    engine: Arc<ExecutionEngine>,
    sweeper: Option<StaleOrderSweeper>,
    context: Arc<StaticContextProvider>,
    clock: Arc<dyn Clock>,
    reporter: Arc<Mutex<SessionSummaryReporter>>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the broker named in the config and the system clock.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let broker: DynBroker = match config.broker_backend {
            BrokerBackend::Rest => {
                let tokens = Arc::new(SourceTokenProvider::new(config.broker.credentials.clone()));
                Arc::new(RestBroker::new(config.broker.clone(), tokens)?)
            }
            BrokerBackend::Mock => {
                warn!("Using in-memory broker, no orders reach an exchange");
                let mock = MockBroker::new();
                // Margin never binds: sizing is left to the risk budget.
                mock.set_margins(config.risk.starting_equity, Decimal::ONE);
                Arc::new(mock)
            }
        };
        Self::with_parts(config, broker, Arc::new(SystemClock))
    }

    /// Build the application around an existing broker and clock.
    pub fn with_parts(
        config: AppConfig,
        broker: DynBroker,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        config.validate()?;
        let calendar = Arc::new(SessionCalendar::from_config(&config.calendar)?);
        let ledger = LedgerHandle::new(RiskLedger::new(
            config.risk.clone(),
            &config.gates,
            calendar.clone(),
            clock.now(),
        ));
        let gate = AdmissionGate::new(
            config.gates.clone(),
            calendar,
            ledger,
            Arc::new(TracingAuditSink),
        );

        let executor = Arc::new(OrderExecutor::new(broker, &config.broker, &config.execution));
        let context = Arc::new(StaticContextProvider::new(
            config.market.regime,
            config.market.volatility_index,
        ));
        let engine = ExecutionEngine::new(
            gate,
            executor.clone(),
            &config.broker,
            config.engine_settings(),
            context.clone(),
        )
        .with_clock(clock.clone());
        let engine = Arc::new(engine);
        let sweeper = StaleOrderSweeper::new(engine.tracker().clone(), executor, &config.sweeper);

        info!(
            mode = ?config.execution.mode,
            backend = ?config.broker_backend,
            timezone = %config.calendar.timezone,
            max_daily_loss = %config.risk.max_daily_loss,
            "Application initialised"
        );

        Ok(Self {
            config,
            engine,
            sweeper: Some(sweeper),
            context,
            clock,
            reporter: Arc::new(Mutex::new(SessionSummaryReporter::new())),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn ledger(&self) -> &LedgerHandle {
        self.engine.ledger()
    }

    /// Market context shared with the gate; operators can change regime at runtime.
    pub fn context(&self) -> &Arc<StaticContextProvider> {
        &self.context
    }

    /// Cancelling this token stops `run`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Load the ledger snapshot, if one is configured and present.
    ///
    /// Returns `true` when today's counters were restored.
    pub fn restore_ledger(&self) -> AppResult<bool> {
        let Some(path) = &self.config.persistence.snapshot_path else {
            return Ok(false);
        };
        match LedgerSnapshot::load(path)? {
            Some(snapshot) => {
                info!(path = %path.display(), taken_at = %snapshot.taken_at, "Restoring ledger");
                Ok(self.ledger().restore(snapshot, self.clock.now()))
            }
            None => {
                info!(path = %path.display(), "No ledger snapshot, starting fresh");
                Ok(false)
            }
        }
    }

    /// Write the ledger snapshot, if persistence is configured.
    pub fn save_ledger(&self) -> AppResult<()> {
        let Some(path) = &self.config.persistence.snapshot_path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        self.ledger().snapshot(self.clock.now()).save(path)?;
        Ok(())
    }

    /// Parse one intake line. Blank lines and `#` comments yield `None`.
    pub fn parse_signal(line: &str) -> AppResult<Option<Signal>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line)?))
    }

    /// Run one intake line through the engine.
    pub async fn submit_line(&self, line: &str) -> AppResult<Option<ExecutionOutcome>> {
        let Some(signal) = Self::parse_signal(line)? else {
            return Ok(None);
        };
        Ok(Some(
            self.engine
                .process(signal, ExecutionOptions::default())
                .await,
        ))
    }

    /// Run until Ctrl-C or the shutdown token fires.
    ///
    /// Signals are read from `input` one JSON object per line. End of input
    /// does not stop the process: open brackets stay monitored until shutdown.
    pub async fn run<R>(mut self, input: R) -> AppResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        match self.restore_ledger() {
            Ok(restored) => debug!(restored, "Ledger restore finished"),
            Err(e) => warn!(error = %e, "Ledger snapshot unreadable, starting fresh"),
        }

        let mut tasks = self.spawn_background_tasks();
        if let Some(sweeper) = self.sweeper.take() {
            let every = Duration::from_secs(self.config.sweeper.interval_secs);
            tasks.push(tokio::spawn(sweeper.run(
                every,
                self.clock.clone(),
                self.shutdown.clone(),
            )));
        }
        info!(tasks = tasks.len(), "Background tasks started");

        let semaphore = Arc::new(Semaphore::new(self.config.runtime.max_in_flight));
        let mut in_flight = JoinSet::new();
        let mut lines = BufReader::new(input).lines();
        let mut input_open = true;
        let mut line_no = 0u64;
        let mut submitted = 0u64;

        info!("Entering signal intake loop");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    self.shutdown.cancel();
                    break;
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Signal task failed");
                    }
                }

                next = lines.next_line(), if input_open => {
                    match next {
                        Ok(Some(line)) => {
                            line_no += 1;
                            let signal = match Self::parse_signal(&line) {
                                Ok(Some(signal)) => signal,
                                Ok(None) => continue,
                                Err(e) => {
                                    warn!(line = line_no, error = %e, "Skipping malformed signal");
                                    continue;
                                }
                            };
                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                break;
                            };
                            submitted += 1;
                            let engine = self.engine.clone();
                            in_flight.spawn(async move {
                                let _permit = permit;
                                let signal_id = signal.id.clone();
                                let symbol = signal.symbol.clone();
                                let outcome = engine.process(signal, ExecutionOptions::default()).await;
                                info!(
                                    signal_id = %signal_id,
                                    symbol = %symbol,
                                    outcome = %outcome,
                                    "Signal processed"
                                );
                            });
                        }
                        Ok(None) => {
                            input_open = false;
                            info!(lines = line_no, submitted, "Signal input closed, monitoring until shutdown");
                        }
                        Err(e) => {
                            input_open = false;
                            error!(error = %e, "Signal input failed, monitoring until shutdown");
                        }
                    }
                }
            }
        }

        self.finish(in_flight, tasks, submitted).await
    }

    fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let runtime = &self.config.runtime;
        let mut tasks = Vec::new();

        // Ledger rollover, window eviction and the per-day summary.
        {
            let ledger = self.ledger().clone();
            let clock = self.clock.clone();
            let reporter = self.reporter.clone();
            let shutdown = self.shutdown.clone();
            let every = Duration::from_secs(runtime.ledger_tick_secs);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let now = clock.now();
                            if ledger.reset_if_period_rolled(now) {
                                let closed = reporter.lock().roll();
                                info!(
                                    accepted = closed.accepted,
                                    rejected = closed.rejected,
                                    "Trading day closed"
                                );
                            }
                            let evicted = ledger.evict_expired(now);
                            if evicted > 0 {
                                debug!(evicted, "Expired window entries evicted");
                            }
                        }
                        () = shutdown.cancelled() => return,
                    }
                }
            }));
        }

        tasks.push(tokio::spawn(
            self.engine.clone().run_retry_sweeper(self.shutdown.clone()),
        ));

        {
            let reporter = self.reporter.clone();
            let shutdown = self.shutdown.clone();
            let every = Duration::from_secs(runtime.summary_interval_secs);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                // First tick fires immediately; skip it.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => reporter.lock().output_summary(),
                        () = shutdown.cancelled() => return,
                    }
                }
            }));
        }

        if self.config.persistence.snapshot_path.is_some()
            && self.config.persistence.snapshot_interval_secs > 0
        {
            let ledger = self.ledger().clone();
            let clock = self.clock.clone();
            let shutdown = self.shutdown.clone();
            let path = self.config.persistence.snapshot_path.clone();
            let every = Duration::from_secs(self.config.persistence.snapshot_interval_secs);
            tasks.push(tokio::spawn(async move {
                let Some(path) = path else { return };
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = ledger.snapshot(clock.now()).save(&path) {
                                warn!(path = %path.display(), error = %e, "Periodic ledger snapshot failed");
                            }
                        }
                        () = shutdown.cancelled() => return,
                    }
                }
            }));
        }

        tasks
    }

    async fn finish(
        self,
        mut in_flight: JoinSet<()>,
        tasks: Vec<JoinHandle<()>>,
        submitted: u64,
    ) -> AppResult<()> {
        let grace = Duration::from_secs(self.config.runtime.shutdown_grace_secs);
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Signal task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = in_flight.len(), "Abandoning in-flight signals after grace period");
            in_flight.shutdown().await;
        }

        self.engine.shutdown();
        self.shutdown.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }

        info!(
            submitted,
            open_trades = self.engine.open_trades().len(),
            tracked_orders = self.engine.tracker().len(),
            pending_retries = self.engine.retry_queue().len(),
            ledger = %self.ledger().stats(),
            "Shutting down"
        );
        self.reporter.lock().output_summary();

        self.save_ledger()?;
        if let Some(path) = &self.config.persistence.snapshot_path {
            info!(path = %path.display(), "Ledger snapshot saved");
        }
        Ok(())
    }
}
