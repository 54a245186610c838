//! Market context supplied to the admission gate.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use sigex_core::{MarketContext, Regime, Signal};

/// Read-only market inputs for one evaluation.
pub trait MarketContextProvider: Send + Sync {
    fn context(&self, signal: &Signal, now: DateTime<Utc>) -> MarketContext;
}

/// Operator-set regime and volatility index, shared by every symbol.
#[derive(Debug, Default)]
pub struct StaticContextProvider {
    regime: RwLock<Option<Regime>>,
    volatility_index: RwLock<Option<Decimal>>,
}

impl StaticContextProvider {
    pub fn new(regime: Option<Regime>, volatility_index: Option<Decimal>) -> Self {
        Self {
            regime: RwLock::new(regime),
            volatility_index: RwLock::new(volatility_index),
        }
    }

    pub fn set_regime(&self, regime: Option<Regime>) {
        *self.regime.write() = regime;
    }

    pub fn set_volatility_index(&self, value: Option<Decimal>) {
        *self.volatility_index.write() = value;
    }
}

impl MarketContextProvider for StaticContextProvider {
    fn context(&self, _signal: &Signal, now: DateTime<Utc>) -> MarketContext {
        let mut ctx = MarketContext::at(now);
        ctx.regime = *self.regime.read();
        ctx.volatility_index = *self.volatility_index.read();
        ctx
    }
}
