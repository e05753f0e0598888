//! # relay-sf-auth
//!
//! Login flows for [`relay_sf_client::SalesforceClient`].
//!
//! Every flow implements [`relay_sf_client::Auth`]; the client wraps it in a
//! token cache that serializes acquisition and refreshes after a 401.
//!
//! ## Security
//!
//! - Passwords, secrets, keys and tokens are redacted in Debug output
//! - Tracing skips credential parameters
//! - Error messages sanitize any credential data
//!
//! ## Supported Authentication Methods
//!
//! - **SOAP login** - username, password and security token
//! - **OAuth 2.0 Client Credentials** - connected app with a run-as user
//! - **OAuth 2.0 JWT Bearer** - server-to-server with a signed assertion
//! - **Static token** - a token issued elsewhere
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_sf_auth::JwtBearerFlow;
//! use relay_sf_client::SalesforceClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth = JwtBearerFlow::from_key_file("consumer_key", "user@example.com", "server.key")?;
//!     let client = SalesforceClient::new("https://acme.my.salesforce.com", auth)?;
//!     let limits = client.limits().await?;
//!     Ok(())
//! }
//! ```

mod client_credentials;
mod error;
mod jwt;
mod oauth;
mod soap;
mod static_token;

pub use client_credentials::ClientCredentialsFlow;
pub use error::{Error, ErrorKind, Result};
pub use jwt::JwtBearerFlow;
pub use soap::SoapLogin;
pub use static_token::StaticToken;

/// Salesforce login URL for production, used as the JWT audience.
pub const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";

/// Salesforce login URL for sandboxes, used as the JWT audience.
pub const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";
