//! Position sizing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::trace;

use sigex_core::Signal;

use crate::config::SizingConfig;

/// Smallest of the risk-based size, the margin-affordable size, the signal's
/// own quantity and the configured ceiling.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Units the configured per-trade risk buys at this stop distance.
    pub fn risk_quantity(&self, signal: &Signal) -> u32 {
        let per_unit = signal.risk_per_unit();
        if per_unit <= Decimal::ZERO {
            return 0;
        }
        (self.config.risk_per_trade / per_unit)
            .floor()
            .to_u32()
            .unwrap_or(u32::MAX)
    }

    /// Final quantity. Zero means the trade cannot be taken.
    pub fn size(&self, signal: &Signal, affordable: u32) -> u32 {
        let by_risk = self.risk_quantity(signal);
        let by_margin = (Decimal::from(affordable) * self.config.margin_utilisation)
            .floor()
            .to_u32()
            .unwrap_or(0);

        let mut qty = by_risk.min(by_margin);
        if signal.quantity > 0 {
            qty = qty.min(signal.quantity);
        }
        if self.config.max_quantity > 0 {
            qty = qty.min(self.config.max_quantity);
        }
        trace!(
            symbol = %signal.symbol,
            by_risk,
            by_margin,
            requested = signal.quantity,
            qty,
            "Position sized"
        );
        qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::test_support::signal;

    #[test]
    fn test_risk_bound() {
        // Stop distance 5, risk 1000 -> 200 units; signal asks for 10.
        let sizer = PositionSizer::new(SizingConfig::default());
        let mut s = signal("INFY");
        assert_eq!(sizer.risk_quantity(&s), 200);
        assert_eq!(sizer.size(&s, 1000), 10);

        s.quantity = 0;
        assert_eq!(sizer.size(&s, 1000), 200);
    }

    #[test]
    fn test_margin_bound() {
        let sizer = PositionSizer::new(SizingConfig::default());
        assert_eq!(sizer.size(&signal("INFY"), 5), 5);
        assert_eq!(sizer.size(&signal("INFY"), 0), 0);
    }

    #[test]
    fn test_utilisation_and_ceiling() {
        let sizer = PositionSizer::new(SizingConfig {
            risk_per_trade: dec!(1000),
            margin_utilisation: dec!(0.5),
            max_quantity: 3,
        });
        let mut s = signal("INFY");
        s.quantity = 0;
        assert_eq!(sizer.size(&s, 5), 2);
        assert_eq!(sizer.size(&s, 100), 3);
    }

    #[test]
    fn test_zero_stop_distance() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let mut s = signal("INFY");
        s.stop_loss = s.entry;
        assert_eq!(sizer.size(&s, 100), 0);
    }
}
