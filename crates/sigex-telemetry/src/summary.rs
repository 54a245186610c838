//! Session summary output.
//!
//! Reads the prometheus counters back and logs what happened during a
//! trading session: how many signals were admitted, why the rest were
//! rejected, how brackets ended and how often the sweepers had to step in.
//! Counters are process-lifetime, so each summary is a delta against the
//! baseline taken when the previous session was closed.

use crate::metrics::{
    BRACKET_OUTCOMES_TOTAL, CANCEL_RACE_TOTAL, GATE_REJECTED_TOTAL, ORDERS_PLACED_TOTAL,
    SIGNALS_EVALUATED_TOTAL, STALE_ORDERS_CANCELLED_TOTAL,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::CounterVec;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Counts for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub accepted: u64,
    pub rejected: u64,
    pub rejections_by_reason: BTreeMap<String, u64>,
    pub bracket_outcomes: BTreeMap<String, u64>,
    pub orders_placed: BTreeMap<String, u64>,
    pub stale_cancelled: u64,
    pub cancel_races: u64,
}

impl SessionSummary {
    /// Read the current cumulative values from the registry.
    pub fn capture() -> Self {
        let evaluated = labelled_counts(&SIGNALS_EVALUATED_TOTAL);
        Self {
            accepted: evaluated.get("accepted").copied().unwrap_or(0),
            rejected: evaluated.get("rejected").copied().unwrap_or(0),
            rejections_by_reason: labelled_counts(&GATE_REJECTED_TOTAL),
            bracket_outcomes: labelled_counts(&BRACKET_OUTCOMES_TOTAL),
            orders_placed: labelled_counts(&ORDERS_PLACED_TOTAL),
            stale_cancelled: STALE_ORDERS_CANCELLED_TOTAL.get(),
            cancel_races: CANCEL_RACE_TOTAL.get(),
        }
    }

    /// Counts accumulated since `baseline`.
    pub fn since(&self, baseline: &SessionSummary) -> Self {
        Self {
            accepted: self.accepted.saturating_sub(baseline.accepted),
            rejected: self.rejected.saturating_sub(baseline.rejected),
            rejections_by_reason: diff_map(&self.rejections_by_reason, &baseline.rejections_by_reason),
            bracket_outcomes: diff_map(&self.bracket_outcomes, &baseline.bracket_outcomes),
            orders_placed: diff_map(&self.orders_placed, &baseline.orders_placed),
            stale_cancelled: self.stale_cancelled.saturating_sub(baseline.stale_cancelled),
            cancel_races: self.cancel_races.saturating_sub(baseline.cancel_races),
        }
    }
}

/// Produces per-session summaries from the cumulative counters.
pub struct SessionSummaryReporter {
    started_at: DateTime<Utc>,
    baseline: SessionSummary,
}

impl Default for SessionSummaryReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSummaryReporter {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            baseline: SessionSummary::capture(),
        }
    }

    /// Summary of the session so far.
    pub fn current(&self) -> SessionSummary {
        SessionSummary::capture().since(&self.baseline)
    }

    /// Log the current summary.
    pub fn output_summary(&self) {
        let s = self.current();
        let minutes = (Utc::now() - self.started_at).num_minutes();

        info!(
            since = %self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            minutes,
            accepted = s.accepted,
            rejected = s.rejected,
            stale_cancelled = s.stale_cancelled,
            cancel_races = s.cancel_races,
            "Session summary"
        );
        for (reason, count) in &s.rejections_by_reason {
            info!(reason = %reason, count, "  rejections");
        }
        for (status, count) in &s.bracket_outcomes {
            info!(status = %status, count, "  bracket outcomes");
        }
        for (role, count) in &s.orders_placed {
            info!(role = %role, count, "  orders placed");
        }
    }

    /// Close the current session and start a new one. Returns the closed summary.
    pub fn roll(&mut self) -> SessionSummary {
        let now = SessionSummary::capture();
        let closed = now.since(&self.baseline);
        self.baseline = now;
        self.started_at = Utc::now();
        closed
    }
}

/// Read a single-label counter vector into `label value -> count`.
fn labelled_counts(counter: &CounterVec) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    for mf in counter.collect() {
        for m in mf.get_metric() {
            let Some(label) = m.get_label().first() else {
                continue;
            };
            let value = m.get_counter().get_value() as u64;
            *out.entry(label.get_value().to_string()).or_insert(0) += value;
        }
    }
    out
}

fn diff_map(now: &BTreeMap<String, u64>, base: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    now.iter()
        .map(|(k, v)| (k.clone(), v.saturating_sub(base.get(k).copied().unwrap_or(0))))
        .filter(|(_, v)| *v > 0)
        .collect()
}
