//! Admission control for the sigex execution engine.
//!
//! - `RiskLedger` / `LedgerHandle`: loss counters, trade caps and
//!   suppression windows, serialized behind one mutex
//! - `AdmissionGate`: ordered check pipeline producing a `Verdict`
//! - `PauseLatch`: fail-closed trading pause
//! - `AuditSink`: fire-and-forget rejection trail
//! - `TtlWindow`: key -> last-seen cache behind every window

pub mod audit;
pub mod config;
pub mod error;
pub mod gates;
pub mod ledger;
pub mod pause;
pub mod ttl_window;

pub use audit::{
    AuditRecord, AuditSink, ChannelAuditSink, CompositeAuditSink, MemoryAuditSink,
    TracingAuditSink,
};
pub use config::{GateConfig, MinRrTable, RiskLimits};
pub use error::{RiskError, RiskResult};
pub use gates::AdmissionGate;
pub use ledger::{LedgerHandle, LedgerSnapshot, LedgerStats, RiskLedger};
pub use pause::{PauseLatch, PauseReason};
pub use ttl_window::TtlWindow;
