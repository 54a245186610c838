//! Broker access for the sigex execution engine.
//!
//! The engine depends only on the [`Broker`] trait. [`RestBroker`] speaks a
//! JSON order API over HTTP; [`MockBroker`] scripts order lifecycles for
//! tests and dry runs.

pub mod broker;
pub mod config;
pub mod error;
pub mod mock;
pub mod rest;
pub mod types;

pub use broker::{BoxFuture, Broker, DynBroker};
pub use config::{BrokerConfig, CredentialSource};
pub use error::{BrokerError, BrokerResult};
pub use mock::MockBroker;
pub use rest::{RestBroker, SourceTokenProvider, TokenProvider};
pub use types::{parse_order_status, Margins, OrderRequest, OrderSnapshot, OrderVariety, Product};
