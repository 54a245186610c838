//! Broker order API contract.
//!
//! The engine only needs request/response calls. Every call may be slow or
//! fail; callers own retries and deadlines.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::BrokerResult;
use crate::types::{Margins, OrderRequest, OrderSnapshot, OrderVariety};

/// Boxed future for dyn-compatible async trait methods.
pub use futures_util::future::BoxFuture;

/// Abstract broker.
pub trait Broker: Send + Sync {
    /// Submit an order. Returns the broker order id.
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<String>>;

    /// Cancel a resting order.
    fn cancel_order(&self, variety: OrderVariety, order_id: String)
        -> BoxFuture<'_, BrokerResult<()>>;

    /// Current order book for the session.
    fn list_orders(&self) -> BoxFuture<'_, BrokerResult<Vec<OrderSnapshot>>>;

    /// Account margin for a segment (e.g. "equity").
    fn get_margins(&self, segment: String) -> BoxFuture<'_, BrokerResult<Margins>>;

    /// Margin the broker would block for `request`.
    fn order_margin(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<Decimal>>;
}

/// Shared broker handle.
pub type DynBroker = Arc<dyn Broker>;
