//! Rejection audit trail.
//!
//! Sinks are fire-and-forget: they must never block or fail the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use sigex_core::{RejectReason, SignalId};

/// Receives every gate rejection.
pub trait AuditSink: Send + Sync {
    fn record_rejection(&self, signal_id: &SignalId, reason: RejectReason, details: &str);
}

/// One rejection as written to the audit channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub signal_id: SignalId,
    pub reason: RejectReason,
    pub details: String,
    pub at: DateTime<Utc>,
}

/// Writes rejections to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_rejection(&self, signal_id: &SignalId, reason: RejectReason, details: &str) {
        info!(target: "audit", signal_id = %signal_id, reason = reason.code(), details, "rejection");
    }
}

/// Forwards rejections to a bounded channel. Records are dropped when it is full.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditRecord>,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record_rejection(&self, signal_id: &SignalId, reason: RejectReason, details: &str) {
        let record = AuditRecord {
            signal_id: signal_id.clone(),
            reason,
            details: details.to_string(),
            at: Utc::now(),
        };
        if let Err(e) = self.tx.try_send(record) {
            warn!(signal_id = %signal_id, error = %e, "Audit record dropped");
        }
    }
}

/// Fans out to several sinks.
#[derive(Default, Clone)]
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for CompositeAuditSink {
    fn record_rejection(&self, signal_id: &SignalId, reason: RejectReason, details: &str) {
        for sink in &self.sinks {
            sink.record_rejection(signal_id, reason, details);
        }
    }
}

/// Keeps rejections in memory. Used by tests and the paper-mode report.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn reasons(&self) -> Vec<RejectReason> {
        self.records.lock().iter().map(|r| r.reason).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_rejection(&self, signal_id: &SignalId, reason: RejectReason, details: &str) {
        self.records.lock().push(AuditRecord {
            signal_id: signal_id.clone(),
            reason,
            details: details.to_string(),
            at: Utc::now(),
        });
    }
}
