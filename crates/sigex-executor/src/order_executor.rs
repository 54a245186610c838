//! Single-leg placement, fill monitoring and cancellation.
//!
//! Leg lifecycle:
//!
//! ```text
//! PENDING -> place_order -> OPEN -> monitor_order -> COMPLETE | REJECTED | CANCELLED
//!                                              \-> deadline -> FillOutcome::Open
//! ```
//!
//! Placement retries only transient broker failures, with `base × 2^attempt`
//! backoff. Business rejections fail on the first answer.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use sigex_broker::{BrokerConfig, DynBroker, OrderRequest, OrderSnapshot, OrderVariety, Product};
use sigex_core::{FillOutcome, LegStatus, OrderLeg};
use sigex_telemetry::Metrics;

use crate::config::ExecutionConfig;
use crate::error::{ExecutorError, ExecutorResult};

/// Longest single placement backoff step.
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The broker had already completed, cancelled or rejected the order.
    AlreadyTerminal,
}

/// Places, watches and cancels individual legs.
pub struct OrderExecutor {
    broker: DynBroker,
    exchange: String,
    product: Product,
    variety: OrderVariety,
    place_retries: u32,
    place_backoff: Duration,
}

impl OrderExecutor {
    pub fn new(broker: DynBroker, broker_config: &BrokerConfig, config: &ExecutionConfig) -> Self {
        Self {
            broker,
            exchange: broker_config.exchange.clone(),
            product: broker_config.product,
            variety: broker_config.variety,
            place_retries: config.place_retries,
            place_backoff: config.place_backoff(),
        }
    }

    pub fn broker(&self) -> &DynBroker {
        &self.broker
    }

    pub fn variety(&self) -> OrderVariety {
        self.variety
    }

    /// Wire request for `leg` with this executor's routing.
    pub fn request_for(&self, leg: &OrderLeg) -> OrderRequest {
        OrderRequest::from_leg(leg, &self.exchange, self.product, self.variety)
    }

    /// Backoff before retry number `attempt + 1`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.place_backoff
            .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
    }

    /// Submit `leg`, retrying transient failures.
    ///
    /// On success the leg is OPEN with its broker id. On failure it is
    /// REJECTED and the last broker error is returned.
    pub async fn place_order(&self, leg: &mut OrderLeg) -> ExecutorResult<String> {
        let request = self.request_for(leg);
        let role = leg.role.to_string();
        let mut attempt = 0u32;

        loop {
            match self.broker.place_order(request.clone()).await {
                Ok(order_id) => {
                    leg.mark_open(order_id.clone());
                    Metrics::order_placed(&role);
                    info!(
                        role = %leg.role,
                        symbol = %leg.symbol,
                        side = %leg.side,
                        quantity = leg.quantity,
                        kind = %leg.kind,
                        order_id = %order_id,
                        tag = %leg.tag,
                        "Order placed"
                    );
                    return Ok(order_id);
                }
                Err(e) if e.is_transient() && attempt < self.place_retries => {
                    let delay = self.backoff_delay(attempt);
                    Metrics::order_retry(&role);
                    warn!(
                        role = %leg.role,
                        symbol = %leg.symbol,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient placement failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    leg.status = LegStatus::Rejected;
                    Metrics::order_failed(&role, e.is_transient());
                    warn!(
                        role = %leg.role,
                        symbol = %leg.symbol,
                        attempts = attempt + 1,
                        transient = e.is_transient(),
                        error = %e,
                        "Order placement failed"
                    );
                    return Err(ExecutorError::PlacementFailed {
                        role: leg.role,
                        attempts: attempt + 1,
                        source: e,
                    });
                }
            }
        }
    }

    /// Poll until `order_id` is terminal or `timeout` elapses.
    ///
    /// Order-book errors are logged and polling continues; only the
    /// deadline ends an unresolved watch.
    pub async fn monitor_order(
        &self,
        order_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> FillOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            match self.order_statuses(&[order_id]).await {
                Ok(book) => match book.get(order_id) {
                    Some(snap) if snap.status == LegStatus::Complete => {
                        debug!(order_id, average_price = ?snap.average_price, "Order filled");
                        return FillOutcome::Filled {
                            average_price: snap.average_price,
                        };
                    }
                    Some(snap)
                        if matches!(snap.status, LegStatus::Rejected | LegStatus::Cancelled) =>
                    {
                        warn!(
                            order_id,
                            status = %snap.status,
                            message = snap.status_message.as_deref().unwrap_or(""),
                            "Order ended without fill"
                        );
                        return FillOutcome::Rejected {
                            reason: snap.status_message.clone(),
                        };
                    }
                    Some(_) => {}
                    None => debug!(order_id, "Order not yet in order book"),
                },
                Err(e) => warn!(order_id, error = %e, "Order book poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                info!(
                    order_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Fill watch timed out, order left resting"
                );
                return FillOutcome::Open;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }

    /// Cancel `order_id`. An order the broker already finished is not an error.
    pub async fn cancel_order(&self, order_id: &str) -> ExecutorResult<CancelOutcome> {
        match self
            .broker
            .cancel_order(self.variety, order_id.to_string())
            .await
        {
            Ok(()) => {
                info!(order_id, "Order cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            Err(e) if e.is_already_terminal() => {
                Metrics::cancel_race();
                info!(order_id, reason = %e, "Cancel raced a terminal order, ignoring");
                Ok(CancelOutcome::AlreadyTerminal)
            }
            Err(e) => {
                warn!(order_id, error = %e, "Cancel failed");
                Err(e.into())
            }
        }
    }

    /// Current book entries for `order_ids`, keyed by id. Missing ids are absent.
    pub async fn order_statuses(
        &self,
        order_ids: &[&str],
    ) -> ExecutorResult<HashMap<String, OrderSnapshot>> {
        let book = self.broker.list_orders().await?;
        Ok(book
            .into_iter()
            .filter(|snap| order_ids.contains(&snap.order_id.as_str()))
            .map(|snap| (snap.order_id.clone(), snap))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    use sigex_broker::{BrokerError, MockBroker};
    use sigex_core::{OrderKind, Price};

    use crate::test_support::{fast_config, signal};

    fn executor(broker: Arc<MockBroker>) -> OrderExecutor {
        OrderExecutor::new(broker, &BrokerConfig::default(), &fast_config())
    }

    #[tokio::test]
    async fn test_place_marks_leg_open() {
        let broker = Arc::new(MockBroker::new());
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::entry(&signal("INFY"), OrderKind::Limit);

        let id = exec.place_order(&mut leg).await.unwrap();
        assert_eq!(id, "MOCK-1");
        assert_eq!(leg.status, LegStatus::Open);
        assert_eq!(leg.order_id(), "MOCK-1");

        let placed = broker.placed();
        assert_eq!(placed[0].1.price, Some(Price::new(dec!(100))));
        assert_eq!(placed[0].1.exchange, "NSE");
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let broker = Arc::new(MockBroker::new());
        broker.fail_next_place(BrokerError::Timeout);
        broker.fail_next_place(BrokerError::Http {
            status: 503,
            body: "unavailable".into(),
        });
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::entry(&signal("INFY"), OrderKind::Limit);

        assert!(exec.place_order(&mut leg).await.is_ok());
        assert_eq!(broker.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_business_rejection_is_not_retried() {
        let broker = Arc::new(MockBroker::new());
        broker.fail_next_place(BrokerError::Rejected("Insufficient funds".into()));
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::entry(&signal("INFY"), OrderKind::Limit);

        let err = exec.place_order(&mut leg).await.unwrap_err();
        match &err {
            ExecutorError::PlacementFailed { attempts, .. } => assert_eq!(*attempts, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_transient());
        assert_eq!(leg.status, LegStatus::Rejected);
        // The queued failure was consumed; nothing else was sent.
        assert!(broker.placed().is_empty());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let broker = Arc::new(MockBroker::new());
        for _ in 0..4 {
            broker.fail_next_place(BrokerError::Network("reset".into()));
        }
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::entry(&signal("INFY"), OrderKind::Limit);

        let err = exec.place_order(&mut leg).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            ExecutorError::PlacementFailed { attempts: 4, .. }
        ));
    }

    #[test]
    fn test_backoff_doubles_and_clamps() {
        let exec = OrderExecutor::new(
            Arc::new(MockBroker::new()),
            &BrokerConfig::default(),
            &ExecutionConfig::default(),
        );
        assert_eq!(exec.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(exec.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(exec.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(exec.backoff_delay(40), exec.backoff_delay(10));
    }

    #[tokio::test]
    async fn test_monitor_sees_fill() {
        let broker = Arc::new(MockBroker::new());
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::entry(&signal("INFY"), OrderKind::Limit);
        let id = exec.place_order(&mut leg).await.unwrap();
        broker.script_statuses(&id, &[LegStatus::Open, LegStatus::Open, LegStatus::Complete]);

        let outcome = exec
            .monitor_order(&id, Duration::from_secs(2), Duration::from_millis(5))
            .await;
        assert!(outcome.is_filled());
    }

    #[tokio::test]
    async fn test_monitor_reports_rejection() {
        let broker = Arc::new(MockBroker::new());
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::entry(&signal("INFY"), OrderKind::Limit);
        let id = exec.place_order(&mut leg).await.unwrap();
        broker.set_status(&id, LegStatus::Rejected);

        let outcome = exec
            .monitor_order(&id, Duration::from_secs(2), Duration::from_millis(5))
            .await;
        assert!(matches!(outcome, FillOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_monitor_times_out_open() {
        let broker = Arc::new(MockBroker::new());
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::entry(&signal("INFY"), OrderKind::Limit);
        let id = exec.place_order(&mut leg).await.unwrap();
        broker.fail_next_list(BrokerError::Timeout);

        let outcome = exec
            .monitor_order(&id, Duration::from_millis(30), Duration::from_millis(5))
            .await;
        assert_eq!(outcome, FillOutcome::Open);
    }

    #[tokio::test]
    async fn test_cancel_of_filled_order_is_benign() {
        let broker = Arc::new(MockBroker::new());
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::stop(&signal("INFY"));
        let id = exec.place_order(&mut leg).await.unwrap();
        broker.set_status(&id, LegStatus::Complete);

        assert_eq!(
            exec.cancel_order(&id).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn test_cancel_network_failure_is_error() {
        let broker = Arc::new(MockBroker::new());
        let exec = executor(broker.clone());
        let mut leg = OrderLeg::stop(&signal("INFY"));
        let id = exec.place_order(&mut leg).await.unwrap();
        broker.fail_cancel(&id, BrokerError::Network("reset".into()));

        assert!(exec.cancel_order(&id).await.is_err());
        assert_eq!(broker.status_of(&id), Some(LegStatus::Open));
    }
}
