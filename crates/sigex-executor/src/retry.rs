//! Delayed re-offer of signals that failed for recoverable reasons.
//!
//! An item is first due `base` after it was queued; each failed re-offer
//! pushes it out by `base × 2^attempt`. Items are dropped after
//! `max_attempts` re-offers, and new items are refused once the queue holds
//! `max_queue_size`.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use sigex_core::{Signal, SignalId};
use sigex_telemetry::Metrics;

use crate::config::RetryConfig;
use crate::engine::ExecutionOptions;

/// Keeps `base × 2^attempt` inside chrono's range.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone)]
pub struct RetryItem {
    pub signal: Signal,
    pub options: ExecutionOptions,
    /// Failed re-offers so far.
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_reason: String,
}

pub struct RetryQueue {
    config: RetryConfig,
    items: Mutex<VecDeque<RetryItem>>,
}

impl RetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the re-offer that follows `attempt` failures.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = i64::try_from(self.config.base_delay_secs).unwrap_or(i64::MAX);
        let factor = 1i64 << attempt.min(MAX_BACKOFF_EXPONENT);
        Duration::seconds(base.saturating_mul(factor).min(i64::MAX / 1000))
    }

    /// Queue `signal` for a later attempt. Returns `false` when refused.
    pub fn queue_failed_signal(
        &self,
        signal: Signal,
        options: ExecutionOptions,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let reason = reason.into();
        let mut items = self.items.lock();
        if items.iter().any(|i| i.signal.id == signal.id) {
            debug!(signal_id = %signal.id, "Signal already queued for retry");
            return false;
        }
        if items.len() >= self.config.max_queue_size {
            Metrics::retry_outcome("refused");
            warn!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                size = items.len(),
                "Retry queue full, signal dropped"
            );
            return false;
        }

        let next_attempt_at = now + self.backoff(0);
        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            reason = %reason,
            next_attempt_at = %next_attempt_at,
            "Signal queued for retry"
        );
        items.push_back(RetryItem {
            signal,
            options,
            attempt: 0,
            next_attempt_at,
            last_reason: reason,
        });
        Metrics::retry_outcome("queued");
        Metrics::retry_queue_depth(items.len() as i64);
        true
    }

    /// Remove and return every item due at `now`.
    pub fn due_items(&self, now: DateTime<Utc>) -> Vec<RetryItem> {
        let mut items = self.items.lock();
        let (due, waiting): (Vec<_>, Vec<_>) =
            items.drain(..).partition(|i| i.next_attempt_at <= now);
        items.extend(waiting);
        Metrics::retry_queue_depth(items.len() as i64);
        due
    }

    /// Put a failed item back with a longer delay, or drop it once it has
    /// used its attempts. Returns `true` if it was requeued.
    pub fn reschedule(
        &self,
        mut item: RetryItem,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        item.attempt += 1;
        item.last_reason = reason.into();
        if item.attempt >= self.config.max_attempts {
            Metrics::retry_outcome("exhausted");
            warn!(
                signal_id = %item.signal.id,
                symbol = %item.signal.symbol,
                attempts = item.attempt,
                reason = %item.last_reason,
                "Retry attempts exhausted, signal dropped"
            );
            return false;
        }

        item.next_attempt_at = now + self.backoff(item.attempt);
        debug!(
            signal_id = %item.signal.id,
            attempt = item.attempt,
            next_attempt_at = %item.next_attempt_at,
            "Retry rescheduled"
        );
        let mut items = self.items.lock();
        items.push_back(item);
        Metrics::retry_outcome("rescheduled");
        Metrics::retry_queue_depth(items.len() as i64);
        true
    }

    pub fn contains(&self, signal_id: &SignalId) -> bool {
        self.items.lock().iter().any(|i| &i.signal.id == signal_id)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Copy of the queued items, in queue order.
    pub fn items(&self) -> Vec<RetryItem> {
        self.items.lock().iter().cloned().collect()
    }
}
