//! Registry of live bracket trades.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sigex_core::{BracketStatus, BracketTrade, TradeId};

struct OpenTrade {
    trade: BracketTrade,
    monitor: CancellationToken,
}

/// Live brackets and the tokens that stop their monitors.
#[derive(Default)]
pub struct OpenTrades {
    trades: DashMap<TradeId, OpenTrade>,
}

impl OpenTrades {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trade: BracketTrade, monitor: CancellationToken) {
        self.trades
            .insert(trade.id.clone(), OpenTrade { trade, monitor });
    }

    pub fn remove(&self, id: &TradeId) -> Option<BracketTrade> {
        self.trades.remove(id).map(|(_, open)| open.trade)
    }

    /// Update the status of a trade that is still live.
    pub fn set_status(&self, id: &TradeId, status: BracketStatus) {
        if let Some(mut open) = self.trades.get_mut(id) {
            open.trade.status = status;
        }
    }

    /// Stop monitoring a trade that was closed by hand.
    ///
    /// The monitor ends with `CANCELLED` and leaves both legs alone.
    pub fn close_externally(&self, id: &TradeId) -> bool {
        match self.trades.get(id) {
            Some(open) => {
                info!(
                    trade_id = %id,
                    symbol = %open.trade.signal.symbol,
                    "Trade closed externally"
                );
                open.monitor.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &TradeId) -> Option<BracketTrade> {
        self.trades.get(id).map(|open| open.trade.clone())
    }

    pub fn list(&self) -> Vec<BracketTrade> {
        self.trades.iter().map(|e| e.value().trade.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

impl std::fmt::Debug for OpenTrades {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenTrades")
            .field("len", &self.trades.len())
            .finish()
    }
}
