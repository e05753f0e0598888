//! Authentication seam and the per-client token cache.
//!
//! Concrete login flows live in `relay-sf-auth`; they implement [`Auth`].
//! The executor only ever talks to an [`AuthProvider`], which serializes
//! acquisition so that concurrent callers share a single login.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{Error, ErrorKind, Result};
use crate::events::{Event, EventBus};
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;

/// An OAuth access token or SOAP session id.
///
/// The value is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Token with no known expiry.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Token expiring at the given instant.
    pub fn with_expiry(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Token expiring `seconds` from now.
    pub fn expires_in(value: impl Into<String>, seconds: i64) -> Self {
        Self::with_expiry(value, Utc::now() + ChronoDuration::seconds(seconds))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True once the expiry instant has passed. Tokens without an expiry
    /// never expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// Everything a login flow needs to talk to Salesforce.
#[derive(Clone, Copy)]
pub struct AuthContext<'a> {
    pub transport: &'a dyn Transport,
    /// Instance base URL, no trailing slash.
    pub base_url: &'a str,
    /// API version like `62.0`.
    pub api_version: &'a str,
    pub event_bus: &'a EventBus,
}

impl fmt::Debug for AuthContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl AuthContext<'_> {
    /// Send a login request, publishing the same lifecycle events as the
    /// executor: request, consumption and, on success, response.
    ///
    /// Transport failures become [`ErrorKind::Authentication`]. Non-success
    /// responses are returned as-is so each flow can read its own error
    /// format. Login requests are never retried.
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.event_bus.publish(Event::Request {
            request: request.clone(),
        });

        let response = self.transport.send(&request).await.map_err(|e| {
            Error::with_source(ErrorKind::Authentication(e.to_string()), e)
        })?;

        self.event_bus.publish(Event::RestApiCallConsumption {
            response: response.clone(),
            count: 1,
        });

        if response.is_success() {
            self.event_bus.publish(Event::Response {
                response: response.clone(),
            });
        }
        Ok(response)
    }
}

/// A way of obtaining access tokens.
///
/// Implementations report their network traffic through
/// [`AuthContext::send`] so subscribers see login requests too.
#[async_trait]
pub trait Auth: Send + Sync + fmt::Debug {
    /// Obtain a brand new token.
    async fn acquire(&self, ctx: &AuthContext<'_>) -> Result<AccessToken>;

    /// Replace a token that expired or was rejected. Defaults to a fresh
    /// acquisition.
    async fn refresh(&self, ctx: &AuthContext<'_>, _stale: &AccessToken) -> Result<AccessToken> {
        self.acquire(ctx).await
    }

    /// Whether a held token should be refreshed before use. By default
    /// tokens are valid until the server rejects them.
    fn is_expired(&self, _token: &AccessToken) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Valid(AccessToken),
    /// Rejected by the server; kept so the refresh can see what it replaces.
    Invalidated(AccessToken),
}

/// Token cache scoped to one client.
///
/// At most one acquisition or refresh runs at a time; callers that arrive
/// while one is in flight wait for it and receive the same token.
pub struct AuthProvider {
    auth: Arc<dyn Auth>,
    slot: Mutex<Slot>,
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProvider")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl AuthProvider {
    pub fn new(auth: Arc<dyn Auth>) -> Self {
        Self {
            auth,
            slot: Mutex::new(Slot::Empty),
        }
    }

    pub fn auth(&self) -> &Arc<dyn Auth> {
        &self.auth
    }

    /// Return the cached token, acquiring or refreshing it first if needed.
    #[instrument(skip(self, ctx), fields(base_url = %ctx.base_url))]
    pub async fn get_token(&self, ctx: &AuthContext<'_>) -> Result<AccessToken> {
        let mut slot = self.slot.lock().await;

        let result = match &*slot {
            Slot::Valid(token) if !self.auth.is_expired(token) => return Ok(token.clone()),
            Slot::Valid(token) | Slot::Invalidated(token) => {
                debug!("Refreshing access token");
                self.auth.refresh(ctx, token).await
            }
            Slot::Empty => {
                debug!("Acquiring access token");
                self.auth.acquire(ctx).await
            }
        };

        let token = result.map_err(into_auth_error)?;
        *slot = Slot::Valid(token.clone());
        Ok(token)
    }

    /// Mark `stale` as rejected so the next `get_token` refreshes it.
    ///
    /// Does nothing if the cache already holds a different token, so
    /// concurrent callers that saw the same 401 trigger one refresh.
    pub async fn invalidate(&self, stale: &AccessToken) {
        let mut slot = self.slot.lock().await;
        if matches!(&*slot, Slot::Valid(current) if current == stale) {
            debug!("Invalidating access token");
            *slot = Slot::Invalidated(stale.clone());
        }
    }

    /// Drop any cached token.
    pub async fn clear(&self) {
        *self.slot.lock().await = Slot::Empty;
    }
}

fn into_auth_error(err: Error) -> Error {
    if err.is_auth_error() {
        err
    } else {
        Error::with_source(ErrorKind::Authentication(err.to_string()), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send(&self, _request: &Request) -> std::result::Result<Response, TransportError> {
            Ok(Response::new(200, vec![], ""))
        }
    }

    #[derive(Debug, Default)]
    struct CountingAuth {
        acquisitions: AtomicUsize,
        refreshes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Auth for CountingAuth {
        async fn acquire(&self, _ctx: &AuthContext<'_>) -> Result<AccessToken> {
            if self.fail {
                return Err(Error::new(ErrorKind::Other("bad credentials".into())));
            }
            let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(AccessToken::new(format!("token-{n}")))
        }

        async fn refresh(&self, _ctx: &AuthContext<'_>, stale: &AccessToken) -> Result<AccessToken> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::new(format!("{}-refreshed", stale.as_str())))
        }
    }

    fn ctx<'a>(transport: &'a NoopTransport, bus: &'a EventBus) -> AuthContext<'a> {
        AuthContext {
            transport,
            base_url: "https://example.my.salesforce.com",
            api_version: "62.0",
            event_bus: bus,
        }
    }

    #[tokio::test]
    async fn test_concurrent_get_token_acquires_once() {
        let auth = Arc::new(CountingAuth::default());
        let provider = Arc::new(AuthProvider::new(auth.clone()));
        let transport = NoopTransport;
        let bus = EventBus::new();

        let tasks = (0..10).map(|_| {
            let provider = Arc::clone(&provider);
            let transport = &transport;
            let bus = &bus;
            async move { provider.get_token(&ctx(transport, bus)).await }
        });
        let tokens = futures::future::join_all(tasks).await;

        assert_eq!(auth.acquisitions.load(Ordering::SeqCst), 1);
        for token in tokens {
            assert_eq!(token.unwrap().as_str(), "token-0");
        }
    }

    #[tokio::test]
    async fn test_invalidate_refreshes_only_matching_token() {
        let auth = Arc::new(CountingAuth::default());
        let provider = AuthProvider::new(auth.clone());
        let transport = NoopTransport;
        let bus = EventBus::new();
        let ctx = ctx(&transport, &bus);

        let first = provider.get_token(&ctx).await.unwrap();
        provider.invalidate(&first).await;
        let second = provider.get_token(&ctx).await.unwrap();
        assert_eq!(second.as_str(), "token-0-refreshed");

        // A second caller holding the old token must not trigger another refresh
        provider.invalidate(&first).await;
        let third = provider.get_token(&ctx).await.unwrap();
        assert_eq!(third, second);
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_authentication_error() {
        let auth = Arc::new(CountingAuth {
            fail: true,
            ..Default::default()
        });
        let provider = AuthProvider::new(auth);
        let transport = NoopTransport;
        let bus = EventBus::new();

        let err = provider.get_token(&ctx(&transport, &bus)).await.unwrap_err();
        assert!(err.is_auth_error());
    }

    #[derive(Debug)]
    struct ExpiringAuth;

    #[async_trait]
    impl Auth for ExpiringAuth {
        async fn acquire(&self, _ctx: &AuthContext<'_>) -> Result<AccessToken> {
            Ok(AccessToken::expires_in("short-lived", -1))
        }

        fn is_expired(&self, token: &AccessToken) -> bool {
            token.is_expired()
        }
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_use() {
        let provider = AuthProvider::new(Arc::new(ExpiringAuth));
        let transport = NoopTransport;
        let bus = EventBus::new();
        let ctx = ctx(&transport, &bus);

        let token = provider.get_token(&ctx).await.unwrap();
        assert!(token.is_expired());
        // Default refresh re-acquires
        let again = provider.get_token(&ctx).await.unwrap();
        assert_eq!(again.as_str(), "short-lived");
    }

    #[test]
    fn test_access_token_debug_redacted() {
        let token = AccessToken::new("00Dxx0000001gEF!secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
        assert!(!token.is_expired());
    }
}
