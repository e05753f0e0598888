//! OAuth 2.0 JWT Bearer flow.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use relay_sf_client::{AccessToken, Auth, AuthContext};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::oauth::request_token;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of the signed assertion itself, not of the issued token.
const ASSERTION_LIFETIME_SECS: i64 = 300;

/// JWT Bearer authentication for server-to-server integration.
///
/// Requires a connected app with a certificate configured. The assertion
/// is signed with RS256 using the matching private key.
#[derive(Clone)]
pub struct JwtBearerFlow {
    /// Consumer key (client_id) from the connected app.
    client_id: String,
    /// Username of the Salesforce user to authenticate as.
    username: String,
    /// Private key for signing the JWT (PEM format).
    private_key: Vec<u8>,
    /// Session lifetime configured on the connected app, if known.
    timeout: Option<Duration>,
}

impl fmt::Debug for JwtBearerFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtBearerFlow")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("private_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl JwtBearerFlow {
    /// Create a new JWT Bearer flow.
    ///
    /// # Arguments
    ///
    /// * `client_id` - The consumer key from the connected app
    /// * `username` - The Salesforce username to authenticate as
    /// * `private_key` - The RSA private key in PEM format
    pub fn new(
        client_id: impl Into<String>,
        username: impl Into<String>,
        private_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            username: username.into(),
            private_key: private_key.into(),
            timeout: None,
        }
    }

    /// Load the private key from a file.
    pub fn from_key_file(
        client_id: impl Into<String>,
        username: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let private_key = std::fs::read(key_path.as_ref())?;
        Ok(Self::new(client_id, username, private_key))
    }

    /// Treat issued tokens as expiring after `timeout`.
    pub fn with_token_lifetime(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Generate a signed JWT assertion for the given instance.
    fn generate_assertion(&self, base_url: &str) -> Result<String> {
        let now = Utc::now();
        let claims = JwtClaims {
            iss: &self.client_id,
            sub: &self.username,
            aud: audience(base_url),
            exp: (now + ChronoDuration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        };

        let key = EncodingKey::from_rsa_pem(&self.private_key)?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }
}

/// Sandboxes authenticate against the test login host.
fn audience(base_url: &str) -> &'static str {
    if base_url.ends_with(".sandbox.my.salesforce.com") {
        crate::SANDBOX_LOGIN_URL
    } else {
        crate::PRODUCTION_LOGIN_URL
    }
}

#[async_trait]
impl Auth for JwtBearerFlow {
    #[instrument(skip(self, ctx), fields(base_url = %ctx.base_url, username = %self.username))]
    async fn acquire(&self, ctx: &AuthContext<'_>) -> relay_sf_client::Result<AccessToken> {
        let assertion = self.generate_assertion(ctx.base_url)?;
        debug!("Authenticating with JWT Bearer flow");

        let form = [
            ("grant_type", JWT_BEARER_GRANT),
            ("assertion", assertion.as_str()),
        ];
        request_token(ctx, &form, self.timeout).await
    }

    fn is_expired(&self, token: &AccessToken) -> bool {
        self.timeout.is_some() && token.is_expired()
    }
}

/// JWT claims for Salesforce OAuth.
#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    /// Issuer (consumer key).
    iss: &'a str,
    /// Subject (username).
    sub: &'a str,
    /// Audience (login host).
    aud: &'static str,
    /// Expiration time (Unix timestamp).
    exp: i64,
}
