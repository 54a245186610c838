//! Prometheus metrics for sigex.
//!
//! Covers:
//! - Admission outcomes and rejection codes
//! - Order placement, retries and broker latency
//! - Bracket outcomes and benign cancel races
//! - Retry queue and stale-order sweeps
//! - Ledger state (paused, daily loss, equity)
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which must crash at startup. These panics
//! only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    register_int_gauge, CounterVec, Encoder, Gauge, HistogramVec, IntCounter, IntGauge,
    TextEncoder,
};

/// Signals evaluated by the admission gate.
/// Labels: outcome (accepted/rejected)
pub static SIGNALS_EVALUATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigex_signals_evaluated_total",
        "Total signals evaluated by the admission gate",
        &["outcome"]
    )
    .unwrap()
});

/// Admission rejections by reason code.
pub static GATE_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigex_gate_rejected_total",
        "Total admission rejections",
        &["reason"]
    )
    .unwrap()
});

/// Orders acknowledged by the broker.
/// Labels: role (ENTRY/STOP/TARGET/FLATTEN)
pub static ORDERS_PLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigex_orders_placed_total",
        "Total orders acknowledged by the broker",
        &["role"]
    )
    .unwrap()
});

/// Placement retries after transient broker failures.
pub static ORDER_PLACE_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigex_order_place_retries_total",
        "Total order placement retries",
        &["role"]
    )
    .unwrap()
});

/// Placement failures after retries are exhausted or on business rejection.
/// Labels: role, kind (transient/business)
pub static ORDER_PLACE_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigex_order_place_failed_total",
        "Total order placement failures",
        &["role", "kind"]
    )
    .unwrap()
});

/// Broker call latency in milliseconds.
/// Labels: call (place/cancel/orders/margins/order_margin)
pub static BROKER_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sigex_broker_latency_ms",
        "Broker API latency in milliseconds",
        &["call"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Terminal bracket outcomes.
/// Labels: status (SL_FILLED/TARGET_FILLED/TIMED_OUT/CANCELLED)
pub static BRACKET_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigex_bracket_outcomes_total",
        "Total bracket trades reaching a terminal status",
        &["status"]
    )
    .unwrap()
});

/// Cancels rejected because the leg had already filled.
pub static CANCEL_RACE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sigex_cancel_race_total",
        "Cancels that lost the race against a fill (benign)"
    )
    .unwrap()
});

/// Brackets currently being monitored.
pub static OPEN_TRADES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("sigex_open_trades", "Bracket trades currently open").unwrap()
});

/// Items waiting in the retry queue.
pub static RETRY_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("sigex_retry_queue_depth", "Signals waiting for retry").unwrap()
});

/// Retry queue outcomes.
/// Labels: outcome (queued/refused/succeeded/rescheduled/dropped)
pub static RETRY_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigex_retry_outcomes_total",
        "Retry queue outcomes",
        &["outcome"]
    )
    .unwrap()
});

/// Resting orders cancelled by the stale-order sweeper.
pub static STALE_ORDERS_CANCELLED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sigex_stale_orders_cancelled_total",
        "Resting orders cancelled for exceeding max age"
    )
    .unwrap()
});

/// Ledger paused flag (1 = paused).
pub static LEDGER_PAUSED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("sigex_ledger_paused", "Risk ledger paused (1=paused)").unwrap()
});

/// Loss accumulated in the current trading day.
pub static DAILY_LOSS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("sigex_daily_loss", "Loss accumulated today").unwrap()
});

/// Account equity tracked by the ledger.
pub static EQUITY: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("sigex_equity", "Ledger equity").unwrap());

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record an accepted signal.
    pub fn signal_accepted() {
        SIGNALS_EVALUATED_TOTAL
            .with_label_values(&["accepted"])
            .inc();
    }

    /// Record a rejected signal with its reason code.
    pub fn signal_rejected(reason: &str) {
        SIGNALS_EVALUATED_TOTAL
            .with_label_values(&["rejected"])
            .inc();
        GATE_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn order_placed(role: &str) {
        ORDERS_PLACED_TOTAL.with_label_values(&[role]).inc();
    }

    pub fn order_retry(role: &str) {
        ORDER_PLACE_RETRIES_TOTAL.with_label_values(&[role]).inc();
    }

    /// Record a placement failure; `transient` selects the kind label.
    pub fn order_failed(role: &str, transient: bool) {
        let kind = if transient { "transient" } else { "business" };
        ORDER_PLACE_FAILED_TOTAL
            .with_label_values(&[role, kind])
            .inc();
    }

    pub fn broker_latency(call: &str, latency_ms: f64) {
        BROKER_LATENCY_MS
            .with_label_values(&[call])
            .observe(latency_ms);
    }

    pub fn bracket_outcome(status: &str) {
        BRACKET_OUTCOMES_TOTAL.with_label_values(&[status]).inc();
    }

    pub fn cancel_race() {
        CANCEL_RACE_TOTAL.inc();
    }

    pub fn open_trades_set(count: i64) {
        OPEN_TRADES.set(count);
    }

    pub fn retry_queue_depth(depth: i64) {
        RETRY_QUEUE_DEPTH.set(depth);
    }

    pub fn retry_outcome(outcome: &str) {
        RETRY_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn stale_order_cancelled() {
        STALE_ORDERS_CANCELLED_TOTAL.inc();
    }

    pub fn ledger_paused(paused: bool) {
        LEDGER_PAUSED.set(i64::from(paused));
    }

    pub fn daily_loss(loss: f64) {
        DAILY_LOSS.set(loss);
    }

    pub fn equity(equity: f64) {
        EQUITY.set(equity);
    }

    /// Render the default registry in the Prometheus text format.
    pub fn gather_text() -> String {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
