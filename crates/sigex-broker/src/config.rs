//! Broker connection settings.

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};
use crate::types::{OrderVariety, Product};

/// Where the session token is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Environment variable holding the token.
    EnvVar { var_name: String },
    /// File whose trimmed contents are the token.
    File { path: String },
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::EnvVar {
            var_name: "SIGEX_BROKER_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key sent alongside the session token.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub credentials: CredentialSource,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default)]
    pub product: Product,
    #[serde(default)]
    pub variety: OrderVariety,
    /// Margin segment queried for available cash.
    #[serde(default = "default_margin_segment")]
    pub margin_segment: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Session tokens are re-read after this long.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_base_url() -> String {
    "https://api.kite.trade".to_string()
}

fn default_exchange() -> String {
    "NSE".to_string()
}

fn default_margin_segment() -> String {
    "equity".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_token_ttl_secs() -> u64 {
    6 * 60 * 60
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            credentials: CredentialSource::default(),
            exchange: default_exchange(),
            product: Product::default(),
            variety: OrderVariety::default(),
            margin_segment: default_margin_segment(),
            timeout_secs: default_timeout_secs(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> BrokerResult<()> {
        if !self.base_url.starts_with("http") {
            return Err(BrokerError::InvalidInput(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(BrokerError::InvalidInput(
                "timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
