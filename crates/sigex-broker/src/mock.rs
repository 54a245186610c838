//! Scripted broker for tests and paper runs.
//!
//! Orders acknowledge with sequential ids (`MOCK-1`, `MOCK-2`, ...) and rest
//! as OPEN until a test moves them. Status scripts advance one step per
//! `list_orders` call, which lets a test describe a fill as
//! "open, open, complete".

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use sigex_core::{LegStatus, OrderKind, Price};

use crate::broker::{BoxFuture, Broker};
use crate::error::{BrokerError, BrokerResult};
use crate::types::{Margins, OrderRequest, OrderSnapshot, OrderVariety};

#[derive(Default)]
struct MockState {
    orders: HashMap<String, OrderSnapshot>,
    /// Order of insertion, so `list_orders` is stable.
    order_ids: Vec<String>,
    scripts: HashMap<String, VecDeque<OrderSnapshot>>,
    place_failures: VecDeque<BrokerError>,
    kind_failures: HashMap<OrderKind, BrokerError>,
    cancel_failures: HashMap<String, BrokerError>,
    list_failures: VecDeque<BrokerError>,
    placed: Vec<(String, OrderRequest)>,
    cancels: Vec<String>,
    margins: Margins,
    margin_per_unit: Decimal,
    margin_failure: Option<BrokerError>,
}

/// In-memory broker double.
pub struct MockBroker {
    next_id: AtomicU64,
    state: Mutex<MockState>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Id the next successful placement will receive.
    pub fn peek_next_id(&self) -> String {
        format!("MOCK-{}", self.next_id.load(Ordering::SeqCst))
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Fail the next placement(s) in order.
    pub fn fail_next_place(&self, error: BrokerError) {
        self.state.lock().place_failures.push_back(error);
    }

    /// Fail every placement of `kind` with `error`.
    pub fn fail_kind(&self, kind: OrderKind, error: BrokerError) {
        self.state.lock().kind_failures.insert(kind, error);
    }

    /// Fail cancels for `order_id` with `error`.
    pub fn fail_cancel(&self, order_id: impl Into<String>, error: BrokerError) {
        self.state
            .lock()
            .cancel_failures
            .insert(order_id.into(), error);
    }

    pub fn fail_next_list(&self, error: BrokerError) {
        self.state.lock().list_failures.push_back(error);
    }

    /// Statuses returned for `order_id` on successive `list_orders` calls.
    /// The last one sticks.
    pub fn script_statuses(&self, order_id: impl Into<String>, statuses: &[LegStatus]) {
        let order_id = order_id.into();
        let steps = statuses
            .iter()
            .map(|s| OrderSnapshot::new(order_id.clone(), *s))
            .collect();
        self.state.lock().scripts.insert(order_id, steps);
    }

    /// Move an order to `status` immediately.
    pub fn set_status(&self, order_id: &str, status: LegStatus) {
        let mut st = self.state.lock();
        st.scripts.remove(order_id);
        let snap = st
            .orders
            .entry(order_id.to_string())
            .or_insert_with(|| OrderSnapshot::new(order_id, status));
        snap.status = status;
        if !st.order_ids.iter().any(|id| id == order_id) {
            st.order_ids.push(order_id.to_string());
        }
    }

    /// Mark an order filled at `price`.
    pub fn fill(&self, order_id: &str, price: Price) {
        let mut st = self.state.lock();
        st.scripts.remove(order_id);
        let qty = st
            .placed
            .iter()
            .find(|(id, _)| id == order_id)
            .map(|(_, req)| req.quantity)
            .unwrap_or(0);
        if let Some(snap) = st.orders.get_mut(order_id) {
            *snap = snap.clone().filled_at(price, qty);
        }
    }

    pub fn set_margins(&self, available: Decimal, margin_per_unit: Decimal) {
        let mut st = self.state.lock();
        st.margins = Margins {
            available,
            utilised: Decimal::ZERO,
        };
        st.margin_per_unit = margin_per_unit;
    }

    pub fn fail_margins(&self, error: BrokerError) {
        self.state.lock().margin_failure = Some(error);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every acknowledged placement with its assigned id.
    pub fn placed(&self) -> Vec<(String, OrderRequest)> {
        self.state.lock().placed.clone()
    }

    /// Every cancel attempt, including failed ones.
    pub fn cancels(&self) -> Vec<String> {
        self.state.lock().cancels.clone()
    }

    pub fn cancel_count(&self, order_id: &str) -> usize {
        self.state
            .lock()
            .cancels
            .iter()
            .filter(|id| id.as_str() == order_id)
            .count()
    }

    pub fn status_of(&self, order_id: &str) -> Option<LegStatus> {
        self.state.lock().orders.get(order_id).map(|s| s.status)
    }
}

impl Broker for MockBroker {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<String>> {
        Box::pin(async move {
            let mut st = self.state.lock();
            if let Some(err) = st.place_failures.pop_front() {
                return Err(err);
            }
            if let Some(err) = st.kind_failures.get(&request.kind) {
                return Err(err.clone());
            }
            let id = format!("MOCK-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let mut snap = OrderSnapshot::new(id.clone(), LegStatus::Open);
            snap.tag = Some(request.tag.clone());
            st.orders.insert(id.clone(), snap);
            st.order_ids.push(id.clone());
            st.placed.push((id.clone(), request));
            Ok(id)
        })
    }

    fn cancel_order(
        &self,
        _variety: OrderVariety,
        order_id: String,
    ) -> BoxFuture<'_, BrokerResult<()>> {
        Box::pin(async move {
            let mut st = self.state.lock();
            st.cancels.push(order_id.clone());
            if let Some(err) = st.cancel_failures.get(&order_id) {
                return Err(err.clone());
            }
            st.scripts.remove(&order_id);
            match st.orders.get_mut(&order_id) {
                Some(snap) if snap.status.is_terminal() => Err(BrokerError::InvalidInput(format!(
                    "Order cannot be cancelled as it is already {}",
                    snap.status.to_string().to_lowercase()
                ))),
                Some(snap) => {
                    snap.status = LegStatus::Cancelled;
                    Ok(())
                }
                None => Err(BrokerError::NotFound(order_id)),
            }
        })
    }

    fn list_orders(&self) -> BoxFuture<'_, BrokerResult<Vec<OrderSnapshot>>> {
        Box::pin(async move {
            let mut st = self.state.lock();
            if let Some(err) = st.list_failures.pop_front() {
                return Err(err);
            }
            let MockState {
                orders,
                order_ids,
                scripts,
                ..
            } = &mut *st;
            for (id, steps) in scripts.iter_mut() {
                let next = if steps.len() > 1 {
                    steps.pop_front()
                } else {
                    steps.front().cloned()
                };
                if let Some(step) = next {
                    let snap = orders
                        .entry(id.clone())
                        .or_insert_with(|| OrderSnapshot::new(id.clone(), step.status));
                    snap.status = step.status;
                    if !order_ids.contains(id) {
                        order_ids.push(id.clone());
                    }
                }
            }
            Ok(order_ids
                .iter()
                .filter_map(|id| orders.get(id).cloned())
                .collect())
        })
    }

    fn get_margins(&self, _segment: String) -> BoxFuture<'_, BrokerResult<Margins>> {
        Box::pin(async move {
            let st = self.state.lock();
            match &st.margin_failure {
                Some(err) => Err(err.clone()),
                None => Ok(st.margins),
            }
        })
    }

    fn order_margin(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<Decimal>> {
        Box::pin(async move {
            let st = self.state.lock();
            match &st.margin_failure {
                Some(err) => Err(err.clone()),
                None => Ok(st.margin_per_unit * Decimal::from(request.quantity)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Product;
    use rust_decimal_macros::dec;
    use sigex_core::OrderSide;

    fn request(qty: u32) -> OrderRequest {
        OrderRequest {
            tag: "sgx1".to_string(),
            symbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            side: OrderSide::Buy,
            quantity: qty,
            kind: OrderKind::Market,
            price: None,
            trigger_price: None,
            product: Product::Intraday,
            variety: OrderVariety::Regular,
        }
    }

    #[tokio::test]
    async fn test_place_then_scripted_fill() {
        let broker = MockBroker::new();
        let id = broker.place_order(request(5)).await.unwrap();
        assert_eq!(id, "MOCK-1");
        broker.script_statuses(&id, &[LegStatus::Open, LegStatus::Complete]);

        let first = broker.list_orders().await.unwrap();
        assert_eq!(first[0].status, LegStatus::Open);
        let second = broker.list_orders().await.unwrap();
        assert_eq!(second[0].status, LegStatus::Complete);
        // Last step sticks.
        let third = broker.list_orders().await.unwrap();
        assert_eq!(third[0].status, LegStatus::Complete);
    }

    #[tokio::test]
    async fn test_cancel_of_filled_order_is_already_terminal() {
        let broker = MockBroker::new();
        let id = broker.place_order(request(1)).await.unwrap();
        broker.set_status(&id, LegStatus::Complete);

        let err = broker
            .cancel_order(OrderVariety::Regular, id.clone())
            .await
            .unwrap_err();
        assert!(err.is_already_terminal());
        assert_eq!(broker.cancel_count(&id), 1);
    }

    #[tokio::test]
    async fn test_scripted_place_failure() {
        let broker = MockBroker::new();
        broker.fail_next_place(BrokerError::Timeout);
        assert!(broker.place_order(request(1)).await.is_err());
        assert!(broker.place_order(request(1)).await.is_ok());
        assert_eq!(broker.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_kind_failure_is_persistent() {
        let broker = MockBroker::new();
        broker.fail_kind(OrderKind::Market, BrokerError::Rejected("blocked".into()));
        assert!(broker.place_order(request(1)).await.is_err());
        assert!(broker.place_order(request(1)).await.is_err());
        assert!(broker.placed().is_empty());
    }

    #[tokio::test]
    async fn test_margins() {
        let broker = MockBroker::new();
        broker.set_margins(dec!(5000), dec!(1000));
        assert_eq!(
            broker.get_margins("equity".into()).await.unwrap().available,
            dec!(5000)
        );
        assert_eq!(broker.order_margin(request(2)).await.unwrap(), dec!(2000));
    }
}
