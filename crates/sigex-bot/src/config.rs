//! Application configuration.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults of every section
//! 2. TOML file (`--config`, then `SIGEX_CONFIG`, then `config/default.toml`)
//! 3. Environment, e.g. `SIGEX__RISK__MAX_DAILY_LOSS=7500`

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sigex_broker::BrokerConfig;
use sigex_core::{CalendarConfig, Regime, SessionCalendar};
use sigex_executor::{
    EngineSettings, ExecutionConfig, RetryConfig, SizingConfig, SweeperConfig, TradingMode,
};
use sigex_risk::{GateConfig, RiskLimits};

use crate::error::{AppError, AppResult};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "SIGEX";

/// Which broker implementation backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// HTTP order API.
    #[default]
    Rest,
    /// In-memory broker. Orders rest until cancelled; useful for dry runs.
    Mock,
}

/// Operator-supplied market context until a live feed is wired in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default)]
    pub regime: Option<Regime>,
    #[serde(default)]
    pub volatility_index: Option<Decimal>,
}

/// Ledger snapshot persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Snapshot file. Unset disables persistence.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: Option<PathBuf>,
    /// Periodic snapshot interval in seconds. 0 = only on shutdown.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

fn default_snapshot_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/ledger.json"))
}

fn default_snapshot_interval_secs() -> u64 {
    300
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

/// Process-level task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Ledger rollover and window eviction check.
    #[serde(default = "default_ledger_tick_secs")]
    pub ledger_tick_secs: u64,
    /// Session summary interval.
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
    /// Signals processed concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// How long shutdown waits for in-flight signals.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_log_filter() -> String {
    "info,sigex=debug".to_string()
}

fn default_ledger_tick_secs() -> u64 {
    60
}

fn default_summary_interval_secs() -> u64 {
    3600
}

fn default_max_in_flight() -> usize {
    16
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            ledger_tick_secs: default_ledger_tick_secs(),
            summary_interval_secs: default_summary_interval_secs(),
            max_in_flight: default_max_in_flight(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub broker_backend: BrokerBackend,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load from `path` (optional file) layered with `SIGEX__` environment variables.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        }
        let config: Self = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to render config: {e}")))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        self.risk.validate()?;
        self.gates.validate()?;
        SessionCalendar::from_config(&self.calendar)?;
        self.execution.validate()?;
        self.sizing.validate()?;
        self.retry.validate()?;
        self.sweeper.validate()?;
        if self.broker_backend == BrokerBackend::Rest {
            self.broker.validate()?;
        }
        if self.runtime.ledger_tick_secs == 0 || self.runtime.summary_interval_secs == 0 {
            return Err(AppError::Config(
                "runtime intervals must be positive".to_string(),
            ));
        }
        if self.runtime.max_in_flight == 0 {
            return Err(AppError::Config("max_in_flight must be positive".to_string()));
        }
        Ok(())
    }

    pub fn is_paper(&self) -> bool {
        self.execution.mode == TradingMode::Paper
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            execution: self.execution.clone(),
            sizing: self.sizing.clone(),
            retry: self.retry.clone(),
        }
    }
}
