//! Pre-issued tokens.

use std::fmt;

use async_trait::async_trait;
use relay_sf_client::{AccessToken, Auth, AuthContext, Error, ErrorKind};

/// A token obtained elsewhere, such as from the `sf` CLI or a web flow.
///
/// It is handed out as-is. Once the server rejects it there is nothing to
/// refresh with, so a refresh fails with an authentication error.
#[derive(Clone)]
pub struct StaticToken {
    token: AccessToken,
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &self.token)
            .finish()
    }
}

impl StaticToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(access_token),
        }
    }
}

impl From<AccessToken> for StaticToken {
    fn from(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Auth for StaticToken {
    async fn acquire(&self, _ctx: &AuthContext<'_>) -> relay_sf_client::Result<AccessToken> {
        Ok(self.token.clone())
    }

    async fn refresh(
        &self,
        _ctx: &AuthContext<'_>,
        _stale: &AccessToken,
    ) -> relay_sf_client::Result<AccessToken> {
        Err(Error::new(ErrorKind::Authentication(
            "static access token was rejected and cannot be refreshed".to_string(),
        )))
    }

    fn is_expired(&self, token: &AccessToken) -> bool {
        token.is_expired()
    }
}
