//! Signal execution bot.
//!
//! Wires the sigex crates into a running process:
//! - Layered configuration (TOML file plus `SIGEX__` environment overrides)
//! - Broker client selection (REST or in-memory)
//! - Newline-delimited JSON signal intake from a file or stdin
//! - Background tasks: ledger rollover, retry sweep, stale-order sweep, summaries
//! - Ledger snapshot restore on startup and save on shutdown

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
