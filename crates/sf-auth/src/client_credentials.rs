//! OAuth 2.0 Client Credentials flow.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use relay_sf_client::{AccessToken, Auth, AuthContext};
use tracing::instrument;

use crate::oauth::request_token;

/// Client Credentials flow for connected apps with a run-as user.
///
/// The token request goes to the instance's own token endpoint.
#[derive(Clone)]
pub struct ClientCredentialsFlow {
    client_id: String,
    client_secret: String,
    /// Session lifetime configured on the connected app, if known.
    timeout: Option<Duration>,
}

impl fmt::Debug for ClientCredentialsFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsFlow")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientCredentialsFlow {
    /// Create a new flow from the connected app's consumer key and secret.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: None,
        }
    }

    /// Treat issued tokens as expiring after `timeout`.
    pub fn with_token_lifetime(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Auth for ClientCredentialsFlow {
    #[instrument(skip(self, ctx), fields(base_url = %ctx.base_url))]
    async fn acquire(&self, ctx: &AuthContext<'_>) -> relay_sf_client::Result<AccessToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        request_token(ctx, &form, self.timeout).await
    }

    fn is_expired(&self, token: &AccessToken) -> bool {
        self.timeout.is_some() && token.is_expired()
    }
}
