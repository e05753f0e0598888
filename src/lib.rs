//! # relay-sf-api
//!
//! An async Salesforce API client for Rust.
//!
//! Every call goes through one request executor that attaches credentials,
//! refreshes them once on a 401, retries according to configurable rules,
//! bounds the number of requests in flight and publishes lifecycle events
//! carrying API quota usage.
//!
//! ## Security
//!
//! - Sensitive data (tokens, secrets, passwords) are redacted in Debug output
//! - Tracing skips credential parameters
//! - Error messages built from response bodies are sanitized
//!
//! ## Crates
//!
//! - **relay-sf-client** - Request executor, retry rules, admission gate, event bus
//! - **relay-sf-auth** - Login flows: SOAP, OAuth client credentials, JWT bearer, static token
//! - **relay-sf-rest** - Composite and composite batch orchestration, sObject CRUD, queries
//! - **relay-sf-bulk** - Bulk API 2.0 ingest jobs with CSV chunking
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay_sf_api::{ClientCredentialsFlow, SalesforceClient, SalesforceRestClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth = ClientCredentialsFlow::new("client-id", "client-secret");
//!     let client = SalesforceClient::new("https://acme.my.salesforce.com", auth)?;
//!     let rest = SalesforceRestClient::from_client(client);
//!
//!     let accounts: Vec<serde_json::Value> = rest
//!         .query("SELECT Id, Name FROM Account LIMIT 10")
//!         .await?;
//!
//!     for account in accounts {
//!         println!("{}", account["Name"]);
//!     }
//!
//!     Ok(())
//! }
//! ```

// Re-export all crates for convenient access
#[cfg(feature = "auth")]
pub use relay_sf_auth as auth;
#[cfg(feature = "bulk")]
pub use relay_sf_bulk as bulk;
#[cfg(feature = "client")]
pub use relay_sf_client as client;
#[cfg(feature = "rest")]
pub use relay_sf_rest as rest;

// Re-export commonly used types at the top level
#[cfg(feature = "auth")]
pub use relay_sf_auth::{ClientCredentialsFlow, JwtBearerFlow, SoapLogin, StaticToken};
#[cfg(feature = "client")]
pub use relay_sf_client::{
    ClientConfig, Event, EventBus, RetryPolicy, SalesforceClient, DEFAULT_API_VERSION,
};
#[cfg(feature = "rest")]
pub use relay_sf_rest::{Composite, CompositeBatch, Reference, SalesforceRestClient};
#[cfg(feature = "bulk")]
pub use relay_sf_bulk::{BulkApiClient, IngestOptions};
