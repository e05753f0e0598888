//! Request executor: auth injection, admission control, retries and events.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::auth::{AccessToken, Auth, AuthContext, AuthProvider};
use crate::config::{normalize_api_version, normalize_base_url, ClientConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::events::{Event, EventBus};
use crate::request::Request;
use crate::response::Response;
use crate::retry::{RetryContext, RetryDecision, RetryPolicy};
use crate::transport::{ReqwestTransport, Transport};
use crate::DEFAULT_API_VERSION;

/// Org API usage above this share of the daily limit is logged as a warning.
pub const API_USAGE_WARN_PERCENT: f64 = 90.0;

/// Salesforce API client.
///
/// Every call goes through [`SalesforceClient::execute`], which:
/// - injects a bearer token from the client's [`AuthProvider`]
/// - waits for a slot in the admission gate before each physical attempt
/// - retries according to the [`RetryPolicy`], refreshing the token once on a 401
/// - publishes lifecycle [`Event`]s on the client's [`EventBus`]
///
/// Cloning is cheap; clones share the token cache, admission gate and event bus.
///
/// # Example
///
/// ```rust,ignore
/// use relay_sf_client::SalesforceClient;
/// use relay_sf_auth::ClientCredentialsFlow;
///
/// let auth = ClientCredentialsFlow::new("client-id", "client-secret");
/// let client = SalesforceClient::new("https://acme.my.salesforce.com", auth)?;
///
/// let accounts: Vec<serde_json::Value> = client.query("SELECT Id, Name FROM Account").await?;
/// ```
#[derive(Clone)]
pub struct SalesforceClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    auth: AuthProvider,
    events: EventBus,
    retry: Arc<RetryPolicy>,
    gate: Semaphore,
    base_url: String,
    api_version: String,
    user_agent: String,
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("base_url", &self.inner.base_url)
            .field("api_version", &self.inner.api_version)
            .field("auth", &self.inner.auth)
            .finish_non_exhaustive()
    }
}

impl SalesforceClient {
    /// Create a client with the default configuration.
    pub fn new(base_url: impl Into<String>, auth: impl Auth + 'static) -> Result<Self> {
        Self::builder(base_url, Arc::new(auth)).build()
    }

    /// Start building a client.
    pub fn builder(base_url: impl Into<String>, auth: Arc<dyn Auth>) -> SalesforceClientBuilder {
        SalesforceClientBuilder {
            base_url: base_url.into(),
            auth,
            config: ClientConfig::default(),
            api_version: DEFAULT_API_VERSION.to_string(),
            transport: None,
            event_bus: None,
        }
    }

    /// Instance base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// API version in the `NN.0` form.
    pub fn api_version(&self) -> &str {
        &self.inner.api_version
    }

    /// The event bus this client publishes to.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn auth(&self) -> &AuthProvider {
        &self.inner.auth
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Admission gate slots currently free.
    pub fn available_permits(&self) -> usize {
        self.inner.gate.available_permits()
    }

    /// Build the full URL for a path.
    ///
    /// If the path starts with `/`, it's appended to the instance URL.
    /// Otherwise, it's assumed to be a full URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.inner.base_url, path)
        } else {
            format!("{}/{}", self.inner.base_url, path)
        }
    }

    /// Build the REST API URL for a path.
    ///
    /// Example: `rest_url("sobjects/Account")` -> `{base}/services/data/v62.0/sobjects/Account`
    pub fn rest_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!(
            "{}/services/data/v{}/{}",
            self.inner.base_url, self.inner.api_version, path
        )
    }

    /// Fetch a token through the provider, handing it this client's transport.
    pub async fn access_token(&self) -> Result<AccessToken> {
        self.inner.auth.get_token(&self.auth_context()).await
    }

    fn auth_context(&self) -> AuthContext<'_> {
        AuthContext {
            transport: self.inner.transport.as_ref(),
            base_url: &self.inner.base_url,
            api_version: &self.inner.api_version,
            event_bus: &self.inner.events,
        }
    }

    /// Execute one logical call, retrying as the policy allows.
    ///
    /// Returns the successful response, or the error for the last attempt.
    /// When at least one retry happened the error is
    /// [`ErrorKind::RetriesExhausted`] with the last failure as its source.
    #[instrument(skip(self, request), fields(method = %request.method(), url = %request.url()))]
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let mut ctx = RetryContext::new(Arc::clone(&self.inner.retry));
        let mut refreshed_after_401 = false;

        loop {
            ctx.mark_attempting();
            let token = self.access_token().await?;
            let attempt = self.prepare(&request, &token);

            let sent = {
                let _permit = self.inner.gate.acquire().await.map_err(|e| {
                    Error::with_source(ErrorKind::Other("admission gate closed".to_string()), e)
                })?;
                self.inner.events.publish(Event::Request {
                    request: attempt.clone(),
                });
                self.inner.transport.send(&attempt).await
            };

            let response = match sent {
                Ok(response) => response,
                Err(err) => match ctx.evaluate_error(&err).await {
                    RetryDecision::Retry { attempt: n, delay } => {
                        warn!(attempt = n, delay_ms = delay.as_millis(), error = %err, "Request failed, retrying");
                        self.inner.events.publish(Event::Retry {
                            attempt: n,
                            request: attempt,
                            response: None,
                            error: Some(err),
                        });
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    RetryDecision::Exhausted => return Err(finish(&ctx, err.into())),
                },
            };

            if let Some(usage) = response.api_usage() {
                if usage.is_above_threshold(API_USAGE_WARN_PERCENT) {
                    warn!(
                        used = usage.used,
                        limit = usage.limit,
                        percent = format!("{:.1}", usage.percentage()),
                        "API usage is close to the org limit"
                    );
                }
            }
            self.inner.events.publish(Event::RestApiCallConsumption {
                response: response.clone(),
                count: 1,
            });

            if response.status() == 401 && !refreshed_after_401 {
                refreshed_after_401 = true;
                self.inner.auth.invalidate(&token).await;
                match ctx.force_retry() {
                    RetryDecision::Retry { attempt: n, .. } => {
                        debug!(attempt = n, "Access token rejected, refreshing");
                        self.inner.events.publish(Event::Retry {
                            attempt: n,
                            request: attempt,
                            response: Some(response),
                            error: None,
                        });
                        continue;
                    }
                    RetryDecision::Exhausted => return Err(finish(&ctx, status_error(&response))),
                }
            }

            if !response.is_success() {
                match ctx.evaluate_response(&response).await {
                    RetryDecision::Retry { attempt: n, delay } => {
                        warn!(
                            attempt = n,
                            delay_ms = delay.as_millis(),
                            status = response.status(),
                            "Request failed, retrying"
                        );
                        self.inner.events.publish(Event::Retry {
                            attempt: n,
                            request: attempt,
                            response: Some(response),
                            error: None,
                        });
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    RetryDecision::Exhausted => return Err(finish(&ctx, status_error(&response))),
                }
            }

            ctx.mark_success();
            if let Some(warning) = response.header("warning") {
                warn!(warning, "Salesforce returned a warning");
            }
            self.inner.events.publish(Event::Response {
                response: response.clone(),
            });
            return Ok(response);
        }
    }

    fn prepare(&self, request: &Request, token: &AccessToken) -> Request {
        let mut attempt = request.clone();
        attempt.set_header("Authorization", format!("Bearer {}", token.as_str()));
        attempt.set_header("User-Agent", self.inner.user_agent.as_str());
        attempt.set_header(
            "Sforce-Call-Options",
            format!("client={}", self.inner.user_agent),
        );
        attempt.set_header("Sforce-Line-Ending", "LF");
        if attempt.header_value("Accept").is_none() {
            attempt.set_header("Accept", "application/json");
        }
        attempt
    }

    // =========================================================================
    // Typed JSON Methods
    // =========================================================================

    /// GET request with JSON response deserialization.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.execute(Request::get(self.url(url))).await?;
        response.json()
    }

    /// POST request with JSON body and response.
    #[instrument(skip(self, body), fields(url = %url))]
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let request = Request::post(self.url(url)).json(body)?;
        let response = self.execute(request).await?;
        response.json()
    }

    /// PATCH request with JSON body. Salesforce answers 204 No Content.
    #[instrument(skip(self, body), fields(url = %url))]
    pub async fn patch_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<()> {
        let request = Request::patch(self.url(url)).json(body)?;
        self.execute(request).await?;
        Ok(())
    }

    /// DELETE request.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn delete_request(&self, url: &str) -> Result<()> {
        self.execute(Request::delete(self.url(url))).await?;
        Ok(())
    }

    /// Org limits (`/limits`).
    pub async fn limits(&self) -> Result<serde_json::Value> {
        self.get_json(&self.rest_url("limits")).await
    }

    // =========================================================================
    // Query Helpers
    // =========================================================================

    /// Fetch the first page of a SOQL query.
    pub async fn query_page<T: DeserializeOwned>(&self, soql: &str) -> Result<QueryResult<T>> {
        self.query_endpoint("query", soql).await
    }

    /// Execute a SOQL query and fetch every page.
    pub async fn query<T: DeserializeOwned>(&self, soql: &str) -> Result<Vec<T>> {
        let first = self.query_endpoint("query", soql).await?;
        self.collect_pages(first).await
    }

    /// Like [`query`](Self::query) but includes deleted and archived records.
    pub async fn query_all<T: DeserializeOwned>(&self, soql: &str) -> Result<Vec<T>> {
        let first = self.query_endpoint("queryAll", soql).await?;
        self.collect_pages(first).await
    }

    /// Fetch the page behind a `nextRecordsUrl`.
    pub async fn query_more<T: DeserializeOwned>(&self, next_records_url: &str) -> Result<QueryResult<T>> {
        self.get_json(next_records_url).await
    }

    async fn query_endpoint<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        soql: &str,
    ) -> Result<QueryResult<T>> {
        let request = Request::get(self.rest_url(endpoint)).query("q", soql);
        let response = self.execute(request).await?;
        response.json()
    }

    async fn collect_pages<T: DeserializeOwned>(&self, first: QueryResult<T>) -> Result<Vec<T>> {
        let mut result = first;
        let mut all_records = Vec::new();
        loop {
            all_records.extend(result.records);
            match result.next_records_url {
                Some(next_url) => result = self.query_more(&next_url).await?,
                None => return Ok(all_records),
            }
        }
    }
}

fn status_error(response: &Response) -> Error {
    let mut err = response
        .error_for_status()
        .unwrap_or_else(|| Error::new(ErrorKind::Other("unexpected success".to_string())));
    if let ErrorKind::RateLimited { retry_after } = &mut err.kind {
        *retry_after = response.retry_after();
    }
    err
}

fn finish(ctx: &RetryContext, err: Error) -> Error {
    if ctx.retries() == 0 {
        err
    } else {
        Error::with_source(
            ErrorKind::RetriesExhausted {
                attempts: ctx.retries(),
            },
            err,
        )
    }
}

/// Builder for [`SalesforceClient`].
#[derive(Debug)]
pub struct SalesforceClientBuilder {
    base_url: String,
    auth: Arc<dyn Auth>,
    config: ClientConfig,
    api_version: String,
    transport: Option<Arc<dyn Transport>>,
    event_bus: Option<EventBus>,
}

impl SalesforceClientBuilder {
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the API version (e.g., "62.0").
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Use a custom transport instead of the default reqwest one.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share an existing event bus.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.event_bus = Some(events);
        self
    }

    pub fn build(self) -> Result<SalesforceClient> {
        self.config.validate()?;
        let base_url = normalize_base_url(&self.base_url)?;
        let api_version = normalize_api_version(&self.api_version)?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        // Without a policy only the 401 refresh may retry.
        let retry = self.config.retry.unwrap_or_else(RetryPolicy::new);

        Ok(SalesforceClient {
            inner: Arc::new(ClientInner {
                transport,
                auth: AuthProvider::new(self.auth),
                events: self.event_bus.unwrap_or_default(),
                retry: Arc::new(retry),
                gate: Semaphore::new(self.config.concurrency_limit),
                base_url,
                api_version,
                user_agent: self.config.user_agent,
            }),
        })
    }
}

/// Result of a SOQL query.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct QueryResult<T> {
    /// Total number of records matching the query.
    #[serde(rename = "totalSize")]
    pub total_size: u64,

    /// Whether all records are returned (no more pages).
    pub done: bool,

    /// URL to fetch next batch of results.
    #[serde(rename = "nextRecordsUrl", default)]
    pub next_records_url: Option<String>,

    /// The records.
    pub records: Vec<T>,
}
