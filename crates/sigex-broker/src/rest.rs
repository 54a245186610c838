//! REST broker client.
//!
//! Talks to a JSON order API that wraps every response in a
//! `{"status": "success" | "error", "data": ..., "message": ...}` envelope.
//! The session token is shared by all calls and refreshed lazily: it is
//! fetched on first use, after its TTL, and after the broker rejects it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sigex_core::Price;
use sigex_telemetry::Metrics;

use crate::broker::{BoxFuture, Broker};
use crate::config::{BrokerConfig, CredentialSource};
use crate::error::{BrokerError, BrokerResult};
use crate::types::{parse_order_status, Margins, OrderRequest, OrderSnapshot, OrderVariety};

/// Supplies session tokens.
pub trait TokenProvider: Send + Sync {
    fn fetch_token(&self) -> BoxFuture<'_, BrokerResult<Zeroizing<String>>>;
}

/// Reads the token from an environment variable or a file on every refresh.
pub struct SourceTokenProvider {
    source: CredentialSource,
}

impl SourceTokenProvider {
    pub fn new(source: CredentialSource) -> Self {
        Self { source }
    }
}

impl TokenProvider for SourceTokenProvider {
    fn fetch_token(&self) -> BoxFuture<'_, BrokerResult<Zeroizing<String>>> {
        Box::pin(async move {
            let raw = match &self.source {
                CredentialSource::EnvVar { var_name } => Zeroizing::new(
                    std::env::var(var_name)
                        .map_err(|_| BrokerError::Auth(format!("{var_name} not set")))?,
                ),
                CredentialSource::File { path } => Zeroizing::new(
                    tokio::fs::read_to_string(path)
                        .await
                        .map_err(|e| BrokerError::Auth(format!("read {path}: {e}")))?,
                ),
            };
            let token = Zeroizing::new(raw.trim().to_string());
            if token.is_empty() {
                return Err(BrokerError::Auth("empty session token".to_string()));
            }
            Ok(token)
        })
    }
}

struct SessionToken {
    value: Zeroizing<String>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    order_id: String,
    status: String,
    #[serde(default)]
    average_price: Decimal,
    #[serde(default)]
    filled_quantity: u32,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

impl From<RawOrder> for OrderSnapshot {
    fn from(raw: RawOrder) -> Self {
        Self {
            order_id: raw.order_id,
            status: parse_order_status(&raw.status),
            average_price: (raw.average_price > Decimal::ZERO).then(|| Price::new(raw.average_price)),
            filled_quantity: raw.filled_quantity,
            status_message: raw.status_message,
            tag: raw.tag,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawUtilised {
    #[serde(default)]
    debits: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawMargins {
    net: Decimal,
    #[serde(default)]
    utilised: RawUtilised,
}

#[derive(Debug, Deserialize)]
struct RawOrderMargin {
    total: Decimal,
}

/// HTTP broker client.
pub struct RestBroker {
    client: Client,
    config: BrokerConfig,
    tokens: Arc<dyn TokenProvider>,
    session: Mutex<Option<SessionToken>>,
}

impl RestBroker {
    pub fn new(config: BrokerConfig, tokens: Arc<dyn TokenProvider>) -> BrokerResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrokerError::Network(format!("Failed to create HTTP client: {e}")))?;
        info!(base_url = %config.base_url, exchange = %config.exchange, "Broker client ready");
        Ok(Self {
            client,
            config,
            tokens,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Current token, refreshing it first when missing or past its TTL.
    async fn token(&self) -> BrokerResult<Zeroizing<String>> {
        let ttl = Duration::from_secs(self.config.token_ttl_secs);
        let mut session = self.session.lock().await;
        if let Some(t) = session.as_ref() {
            if t.fetched_at.elapsed() < ttl {
                return Ok(t.value.clone());
            }
            debug!("Session token past TTL, refreshing");
        }
        let value = self.tokens.fetch_token().await?;
        *session = Some(SessionToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.session.lock().await = None;
    }

    async fn request(&self, method: Method, path: &str) -> BrokerResult<RequestBuilder> {
        let token = self.token().await?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let auth = Zeroizing::new(format!("token {}:{}", self.config.api_key, token.as_str()));
        Ok(self
            .client
            .request(method, url)
            .header("X-Kite-Version", "3")
            .header(reqwest::header::AUTHORIZATION, auth.as_str()))
    }

    /// Send, time and unwrap the envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        call: &'static str,
        builder: RequestBuilder,
    ) -> BrokerResult<T> {
        let started = Instant::now();
        let result = builder.send().await;
        Metrics::broker_latency(call, started.elapsed().as_secs_f64() * 1000.0);
        let response = result?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BrokerError::RateLimited);
        }
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(call, %status, "Session token rejected, will refresh");
            self.invalidate_token().await;
            return Err(BrokerError::Auth(body));
        }

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(e) => e,
            Err(_) if !status.is_success() => {
                return Err(BrokerError::Http {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if envelope.status != "success" {
            let message = envelope.message.unwrap_or_default();
            return Err(match envelope.error_type.as_deref() {
                Some("TokenException") => {
                    self.invalidate_token().await;
                    BrokerError::Auth(message)
                }
                Some("InputException") => BrokerError::InvalidInput(message),
                Some("OrderException") | Some("MarginException") => BrokerError::Rejected(message),
                Some("NetworkException") => BrokerError::Network(message),
                _ => BrokerError::Http {
                    status: status.as_u16(),
                    body: message,
                },
            });
        }

        envelope
            .data
            .ok_or_else(|| BrokerError::Decode(format!("{call}: missing data")))
    }
}

impl Broker for RestBroker {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<String>> {
        Box::pin(async move {
            let path = format!("/orders/{}", request.variety.as_str());
            let builder = self.request(Method::POST, &path).await?.json(&request);
            let placed: PlacedOrder = self.call("place", builder).await?;
            debug!(order_id = %placed.order_id, tag = %request.tag, symbol = %request.symbol, "Order acknowledged");
            Ok(placed.order_id)
        })
    }

    fn cancel_order(
        &self,
        variety: OrderVariety,
        order_id: String,
    ) -> BoxFuture<'_, BrokerResult<()>> {
        Box::pin(async move {
            let path = format!("/orders/{}/{}", variety.as_str(), order_id);
            let builder = self.request(Method::DELETE, &path).await?;
            let _: PlacedOrder = self.call("cancel", builder).await?;
            Ok(())
        })
    }

    fn list_orders(&self) -> BoxFuture<'_, BrokerResult<Vec<OrderSnapshot>>> {
        Box::pin(async move {
            let builder = self.request(Method::GET, "/orders").await?;
            let raw: Vec<RawOrder> = self.call("orders", builder).await?;
            Ok(raw.into_iter().map(OrderSnapshot::from).collect())
        })
    }

    fn get_margins(&self, segment: String) -> BoxFuture<'_, BrokerResult<Margins>> {
        Box::pin(async move {
            let path = format!("/user/margins/{segment}");
            let builder = self.request(Method::GET, &path).await?;
            let raw: RawMargins = self.call("margins", builder).await?;
            Ok(Margins {
                available: raw.net,
                utilised: raw.utilised.debits,
            })
        })
    }

    fn order_margin(&self, request: OrderRequest) -> BoxFuture<'_, BrokerResult<Decimal>> {
        Box::pin(async move {
            let builder = self
                .request(Method::POST, "/margins/orders")
                .await?
                .json(&[&request]);
            let raw: Vec<RawOrderMargin> = self.call("order_margin", builder).await?;
            raw.first()
                .map(|m| m.total)
                .ok_or_else(|| BrokerError::Decode("order_margin: empty response".to_string()))
        })
    }
}
