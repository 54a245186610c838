//! Broker margin lookup for sizing.
//!
//! The per-unit margin is sampled from the order-margin endpoint at a small
//! quantity and divided into available cash. The result feeds the sizer; a
//! zero affordable quantity is what blocks execution.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use sigex_broker::{BrokerConfig, BrokerResult};
use sigex_core::{OrderKind, OrderLeg, Signal};

use crate::config::ExecutionConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::order_executor::OrderExecutor;

/// Margin answer for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Affordability {
    pub can_place: bool,
    /// Largest whole quantity the available cash covers.
    pub quantity: u32,
    /// Margin for the signal's requested quantity (one unit if unsized).
    pub required: Decimal,
    pub available: Decimal,
    pub per_unit: Decimal,
}

impl Affordability {
    fn blocked(available: Decimal, per_unit: Decimal) -> Self {
        Self {
            can_place: false,
            quantity: 0,
            required: per_unit,
            available,
            per_unit,
        }
    }
}

/// Affordable quantity from cash and per-unit margin.
///
/// Floors the division. A non-positive per-unit margin means the broker
/// gave no usable answer and nothing is affordable.
pub fn affordable_quantity(available: Decimal, per_unit: Decimal) -> u32 {
    if per_unit <= Decimal::ZERO || available <= Decimal::ZERO {
        return 0;
    }
    (available / per_unit)
        .floor()
        .to_u32()
        .unwrap_or(u32::MAX)
}

pub struct MarginPrecheck {
    executor: Arc<OrderExecutor>,
    segment: String,
    entry_kind: OrderKind,
    timeout: Duration,
}

impl MarginPrecheck {
    pub fn new(
        executor: Arc<OrderExecutor>,
        broker_config: &BrokerConfig,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            executor,
            segment: broker_config.margin_segment.clone(),
            entry_kind: config.entry_order_kind,
            timeout: config.margin_timeout(),
        }
    }

    /// Price `sample_qty` units of `signal`'s entry and derive how many units fit.
    pub async fn can_afford(
        &self,
        signal: &Signal,
        sample_qty: u32,
    ) -> ExecutorResult<Affordability> {
        let sample_qty = sample_qty.max(1);
        let broker = self.executor.broker();

        let margins = with_deadline(
            "margin lookup",
            self.timeout,
            broker.get_margins(self.segment.clone()),
        )
        .await?;

        let sample = OrderLeg::entry(&signal.with_quantity(sample_qty), self.entry_kind);
        let request = self.executor.request_for(&sample);
        let sample_margin =
            with_deadline("order margin", self.timeout, broker.order_margin(request)).await?;

        let per_unit = sample_margin / Decimal::from(sample_qty);
        if per_unit <= Decimal::ZERO {
            debug!(symbol = %signal.symbol, %sample_margin, "Broker returned no per-unit margin");
            return Ok(Affordability::blocked(margins.available, per_unit));
        }

        let quantity = affordable_quantity(margins.available, per_unit);
        let required = per_unit * Decimal::from(signal.quantity.max(1));
        let answer = Affordability {
            can_place: quantity > 0,
            quantity,
            required,
            available: margins.available,
            per_unit,
        };
        debug!(
            symbol = %signal.symbol,
            available = %answer.available,
            per_unit = %per_unit,
            quantity,
            "Margin precheck"
        );
        Ok(answer)
    }
}

async fn with_deadline<T>(
    what: &'static str,
    limit: Duration,
    call: impl Future<Output = BrokerResult<T>>,
) -> ExecutorResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ExecutorError::Timeout(what)),
    }
}
