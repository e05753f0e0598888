//! # relay-sf-client
//!
//! Core client infrastructure for Salesforce APIs.
//!
//! This crate provides the request executor with:
//! - Rule-based retries with exponential backoff and jitter
//! - Single-flight token acquisition and 401 refresh
//! - A client-wide admission gate bounding requests in flight
//! - Fire-and-forget lifecycle events with API usage tracking
//! - A pluggable transport (reqwest by default)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  (relay-sf-rest composite/sObject, user code)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SalesforceClient                          │
//! │  - AuthProvider (token cache, single-flight refresh)        │
//! │  - RetryPolicy / RetryContext                               │
//! │  - Admission gate + EventBus                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Transport                                │
//! │  - ReqwestTransport: pooling, compression, timeouts         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_sf_client::{SalesforceClient, Event};
//! use relay_sf_auth::ClientCredentialsFlow;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relay_sf_client::Error> {
//!     let auth = ClientCredentialsFlow::new("client-id", "client-secret");
//!     let client = SalesforceClient::new("https://acme.my.salesforce.com", auth)?;
//!
//!     client.events().subscribe(|event| {
//!         if let Some(remaining) = event.remaining() {
//!             tracing::info!(remaining, "API calls left");
//!         }
//!         Ok(())
//!     });
//!
//!     let limits = client.limits().await?;
//!     Ok(())
//! }
//! ```

mod auth;
mod client;
mod config;
mod error;
mod events;
mod request;
mod response;
mod retry;
mod transport;

pub use auth::{AccessToken, Auth, AuthContext, AuthProvider};
pub use client::{QueryResult, SalesforceClient, SalesforceClientBuilder, API_USAGE_WARN_PERCENT};
pub use config::{
    normalize_api_version, normalize_base_url, ClientConfig, ClientConfigBuilder,
    DEFAULT_CONCURRENCY_LIMIT,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{Event, EventBus, SubscriptionId};
pub use request::{Request, RequestMethod};
pub use response::{parse_error_response, ApiUsage, Response};
pub use retry::{
    BackoffStrategy, ExceptionRule, ResponseRule, RetryContext, RetryDecision, RetryPolicy,
    RetryState, DEFAULT_RULE_MAX_RETRIES,
};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportErrorKind};

/// Default Salesforce API version
pub const DEFAULT_API_VERSION: &str = "62.0";

/// User-Agent string for the client
pub const USER_AGENT: &str = concat!("relay-sf-api/", env!("CARGO_PKG_VERSION"));
