//! Trading pause latch.
//!
//! Once tripped by a loss or drawdown breach the latch stays set until the
//! next daily reset or an explicit operator resume. The gate reads it on
//! every evaluation and rejects with `tradingPaused` while it is set.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// PauseReason
// ============================================================================

/// Why trading was paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    /// Daily realized loss reached the configured ceiling.
    DailyLoss { loss: Decimal, limit: Decimal },
    /// Equity fell below the allowed fraction of its peak.
    Drawdown { equity: Decimal, peak: Decimal },
    /// Operator request.
    Manual { message: String },
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyLoss { loss, limit } => write!(f, "daily loss {loss} >= {limit}"),
            Self::Drawdown { equity, peak } => {
                write!(f, "equity {equity} below drawdown floor (peak {peak})")
            }
            Self::Manual { message } => write!(f, "manual: {message}"),
        }
    }
}

// ============================================================================
// PauseLatch
// ============================================================================

/// Fail-closed pause flag.
///
/// The first trigger wins; later triggers keep the original reason.
#[derive(Debug, Default)]
pub struct PauseLatch {
    paused: AtomicBool,
    state: RwLock<Option<(PauseReason, DateTime<Utc>)>>,
}

impl PauseLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Set the latch. Returns `true` if this call paused trading.
    pub fn trigger(&self, reason: PauseReason) -> bool {
        self.trigger_at(reason, Utc::now())
    }

    /// Set the latch with an explicit timestamp (used by snapshot restore).
    pub fn trigger_at(&self, reason: PauseReason, at: DateTime<Utc>) -> bool {
        if self
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            error!(reason = %reason, "TRADING PAUSED");
            *self.state.write() = Some((reason, at));
            true
        } else {
            warn!(new_reason = %reason, "Trading already paused, keeping original reason");
            false
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<PauseReason> {
        self.state.read().as_ref().map(|(r, _)| r.clone())
    }

    #[must_use]
    pub fn triggered_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().as_ref().map(|(_, at)| *at)
    }

    /// Clear the latch. No-op when not paused.
    pub fn reset(&self) {
        if self.is_paused() {
            let previous = self.state.write().take();
            self.paused.store(false, Ordering::SeqCst);
            info!(previous_reason = ?previous.map(|(r, _)| r), "Trading resumed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_latch_initially_clear() {
        let latch = PauseLatch::new();
        assert!(!latch.is_paused());
        assert!(latch.reason().is_none());
        assert!(latch.triggered_at().is_none());
    }

    #[test]
    fn test_first_trigger_wins() {
        let latch = PauseLatch::new();
        assert!(latch.trigger(PauseReason::DailyLoss {
            loss: dec!(5200),
            limit: dec!(5000),
        }));
        assert!(!latch.trigger(PauseReason::Manual {
            message: "ops".to_string(),
        }));

        assert!(latch.is_paused());
        assert!(matches!(
            latch.reason(),
            Some(PauseReason::DailyLoss { .. })
        ));
    }

    #[test]
    fn test_reset_clears_reason() {
        let latch = PauseLatch::new();
        latch.trigger(PauseReason::Manual {
            message: "halt".to_string(),
        });
        latch.reset();
        assert!(!latch.is_paused());
        assert!(latch.reason().is_none());

        // Can be triggered again after reset.
        assert!(latch.trigger(PauseReason::Manual {
            message: "again".to_string(),
        }));
    }
}
