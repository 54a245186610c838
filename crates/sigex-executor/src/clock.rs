//! Wall-clock abstraction.
//!
//! Admission decisions depend on the exchange session, so everything that
//! asks "what time is it" goes through [`Clock`]. Tests and replays use
//! [`ManualClock`].

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::market_open;

    #[test]
    fn test_manual_clock_moves_only_on_request() {
        let clock = ManualClock::new(market_open());
        assert_eq!(clock.now(), market_open());
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), market_open() + Duration::minutes(5));
        clock.set(market_open());
        assert_eq!(clock.now(), market_open());
    }
}
