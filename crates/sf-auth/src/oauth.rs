//! Shared handling of the OAuth 2.0 token endpoint.

use std::time::Duration;

use relay_sf_client::{AccessToken, AuthContext, Request, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

/// Token endpoint path, relative to the instance URL.
pub(crate) const TOKEN_PATH: &str = "/services/oauth2/token";

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub instance_url: Option<String>,
}

/// OAuth error response.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// POST a form to the token endpoint and turn the reply into a token.
///
/// `lifetime`, when set, stamps the token with an expiry relative to now.
pub(crate) async fn request_token<F: Serialize + ?Sized>(
    ctx: &AuthContext<'_>,
    form: &F,
    lifetime: Option<Duration>,
) -> relay_sf_client::Result<AccessToken> {
    let url = format!("{}{}", ctx.base_url, TOKEN_PATH);
    let request = Request::post(url)
        .header("Accept", "application/json")
        .form(form)?;

    let response = ctx.send(request).await?;
    Ok(parse_token_response(&response, lifetime)?)
}

fn parse_token_response(response: &Response, lifetime: Option<Duration>) -> Result<AccessToken> {
    if !response.is_success() {
        return Err(oauth_error(response));
    }

    let body: TokenResponse = serde_json::from_slice(response.bytes())?;
    debug!(
        instance_url = body.instance_url.as_deref().unwrap_or("-"),
        "Token endpoint returned an access token"
    );

    Ok(match lifetime {
        Some(lifetime) => {
            let seconds = i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX);
            AccessToken::expires_in(body.access_token, seconds)
        }
        None => AccessToken::new(body.access_token),
    })
}

fn oauth_error(response: &Response) -> Error {
    match serde_json::from_slice::<OAuthErrorResponse>(response.bytes()) {
        Ok(body) => Error::new(ErrorKind::OAuth {
            error: body.error,
            description: body.error_description,
        }),
        Err(_) => Error::new(ErrorKind::Http {
            status: response.status(),
            message: relay_sf_client::parse_error_response(response.status(), &response.text())
                .to_string(),
        }),
    }
}
