//! Resting-order tracking and stale-order cancellation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sigex_core::{LegRole, OrderLeg};
use sigex_telemetry::Metrics;

use crate::clock::Clock;
use crate::config::SweeperConfig;
use crate::order_executor::{CancelOutcome, OrderExecutor};

/// A resting order nobody else is watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOrder {
    pub order_id: String,
    pub role: LegRole,
    pub symbol: String,
    pub placed_at: DateTime<Utc>,
}

/// Orders left resting at the broker, keyed by order id.
#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: DashMap<String, TrackedOrder>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a placed leg. Legs without a broker id are ignored.
    pub fn track(&self, leg: &OrderLeg, placed_at: DateTime<Utc>) {
        let Some(order_id) = leg.id.clone() else {
            return;
        };
        debug!(
            order_id = %order_id,
            role = %leg.role,
            symbol = %leg.symbol,
            "Tracking resting order"
        );
        self.orders.insert(
            order_id.clone(),
            TrackedOrder {
                order_id,
                role: leg.role,
                symbol: leg.symbol.clone(),
                placed_at,
            },
        );
    }

    pub fn untrack(&self, order_id: &str) -> Option<TrackedOrder> {
        self.orders.remove(order_id).map(|(_, order)| order)
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.orders.contains_key(order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn snapshot(&self) -> Vec<TrackedOrder> {
        self.orders.iter().map(|e| e.value().clone()).collect()
    }
}

/// Cancels tracked orders that outlive `max_age`.
pub struct StaleOrderSweeper {
    tracker: Arc<OrderTracker>,
    executor: Arc<OrderExecutor>,
    max_age: Duration,
}

impl StaleOrderSweeper {
    pub fn new(
        tracker: Arc<OrderTracker>,
        executor: Arc<OrderExecutor>,
        config: &SweeperConfig,
    ) -> Self {
        let max_age_secs = i64::try_from(config.max_age_secs).unwrap_or(i64::MAX / 1000);
        Self {
            tracker,
            executor,
            max_age: Duration::seconds(max_age_secs),
        }
    }

    /// One sweep. Returns the number of orders cancelled.
    ///
    /// Orders the broker already finished are simply forgotten. A failed
    /// cancel keeps the order tracked for the next sweep.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let tracked = self.tracker.snapshot();
        if tracked.is_empty() {
            return 0;
        }

        let ids: Vec<&str> = tracked.iter().map(|o| o.order_id.as_str()).collect();
        let book = match self.executor.order_statuses(&ids).await {
            Ok(book) => book,
            Err(e) => {
                warn!(
                    error = %e,
                    tracked = tracked.len(),
                    "Stale sweep skipped, order book unavailable"
                );
                return 0;
            }
        };

        let mut cancelled = 0;
        for order in tracked {
            if let Some(snap) = book.get(&order.order_id) {
                if snap.status.is_terminal() {
                    debug!(
                        order_id = %order.order_id,
                        status = %snap.status,
                        "Tracked order finished"
                    );
                    self.tracker.untrack(&order.order_id);
                    continue;
                }
            }
            if now - order.placed_at < self.max_age {
                continue;
            }

            match self.executor.cancel_order(&order.order_id).await {
                Ok(CancelOutcome::Cancelled) => {
                    cancelled += 1;
                    Metrics::stale_order_cancelled();
                    info!(
                        order_id = %order.order_id,
                        role = %order.role,
                        symbol = %order.symbol,
                        age_secs = (now - order.placed_at).num_seconds(),
                        "Stale order cancelled"
                    );
                    self.tracker.untrack(&order.order_id);
                }
                Ok(CancelOutcome::AlreadyTerminal) => {
                    self.tracker.untrack(&order.order_id);
                }
                Err(e) => {
                    warn!(
                        order_id = %order.order_id,
                        error = %e,
                        "Stale order cancel failed, will retry"
                    );
                }
            }
        }
        cancelled
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn run(
        self,
        interval: std::time::Duration,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            max_age_secs = self.max_age.num_seconds(),
            "Stale order sweeper started"
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once(clock.now()).await;
                }
                () = shutdown.cancelled() => {
                    info!(remaining = self.tracker.len(), "Stale order sweeper stopped");
                    return;
                }
            }
        }
    }
}
