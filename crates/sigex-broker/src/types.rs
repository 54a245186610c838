//! Request and response types of the broker order API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sigex_core::{LegStatus, OrderKind, OrderLeg, OrderSide, Price};

/// Order variety. Cancels must name the same variety the order was placed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderVariety {
    #[default]
    Regular,
    /// After-market order.
    Amo,
}

impl OrderVariety {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Amo => "amo",
        }
    }
}

/// Position product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Product {
    /// Intraday, squared off by the broker at session end.
    #[default]
    #[serde(rename = "MIS")]
    Intraday,
    /// Delivery.
    #[serde(rename = "CNC")]
    Delivery,
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client tag echoed back by the broker.
    pub tag: String,
    pub symbol: String,
    pub exchange: String,
    pub side: OrderSide,
    pub quantity: u32,
    #[serde(rename = "order_type")]
    pub kind: OrderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<Price>,
    pub product: Product,
    #[serde(skip)]
    pub variety: OrderVariety,
}

impl OrderRequest {
    /// Build the wire request for a leg.
    pub fn from_leg(leg: &OrderLeg, exchange: &str, product: Product, variety: OrderVariety) -> Self {
        Self {
            tag: leg.tag.as_str().to_string(),
            symbol: leg.symbol.clone(),
            exchange: exchange.to_string(),
            side: leg.side,
            quantity: leg.quantity,
            kind: leg.kind,
            price: leg.price,
            trigger_price: leg.trigger,
            product,
            variety,
        }
    }
}

/// One entry of the broker's order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub status: LegStatus,
    #[serde(default)]
    pub average_price: Option<Price>,
    #[serde(default)]
    pub filled_quantity: u32,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl OrderSnapshot {
    pub fn new(order_id: impl Into<String>, status: LegStatus) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            average_price: None,
            filled_quantity: 0,
            status_message: None,
            tag: None,
        }
    }

    #[must_use]
    pub fn filled_at(mut self, price: Price, quantity: u32) -> Self {
        self.status = LegStatus::Complete;
        self.average_price = Some(price);
        self.filled_quantity = quantity;
        self
    }
}

/// Account margin for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Margins {
    pub available: Decimal,
    #[serde(default)]
    pub utilised: Decimal,
}

/// Broker status strings mapped onto leg states.
///
/// Intermediate states ("TRIGGER PENDING", "VALIDATION PENDING", ...) count as open.
pub fn parse_order_status(raw: &str) -> LegStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "COMPLETE" | "FILLED" | "EXECUTED" => LegStatus::Complete,
        "REJECTED" => LegStatus::Rejected,
        "CANCELLED" | "CANCELED" => LegStatus::Cancelled,
        "PUT ORDER REQ RECEIVED" => LegStatus::Pending,
        _ => LegStatus::Open,
    }
}
