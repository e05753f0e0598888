//! Error types for sf-client.

use std::time::Duration;

use crate::transport::{TransportError, TransportErrorKind};

/// Result type alias for sf-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-client operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this is a rate limit error.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, ErrorKind::RateLimited { .. })
    }

    /// Returns true if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Authentication(_))
    }

    /// Returns true if retries were attempted and exhausted.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::RetriesExhausted { .. })
    }

    /// HTTP status carried by this error, looking through a retry wrapper.
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Http { status, .. } | ErrorKind::SalesforceApi { status, .. } => {
                Some(*status)
            }
            ErrorKind::RateLimited { .. } => Some(429),
            ErrorKind::RetriesExhausted { .. } => self
                .source
                .as_ref()
                .and_then(|s| s.downcast_ref::<Error>())
                .and_then(Error::status),
            _ => None,
        }
    }

    /// Salesforce error code carried by this error, looking through a retry wrapper.
    pub fn error_code(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::SalesforceApi { error_code, .. } => Some(error_code),
            ErrorKind::RetriesExhausted { .. } => self
                .source
                .as_ref()
                .and_then(|s| s.downcast_ref::<Error>())
                .and_then(Error::error_code),
            _ => None,
        }
    }

    /// Returns the retry-after duration if this is a rate limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match &self.kind {
            ErrorKind::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Network or connection failure below HTTP.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// Non-success HTTP response without a recognizable Salesforce error body.
    #[error("HTTP error: {status} {message}")]
    Http { status: u16, message: String },

    /// Salesforce API error response.
    #[error("Salesforce API error ({status}): {error_code} - {message}")]
    SalesforceApi {
        status: u16,
        error_code: String,
        message: String,
        fields: Vec<String>,
    },

    /// Token acquisition or refresh failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Authorization error (HTTP 403).
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Resource not found (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("Rate limited{}", retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// All retries exhausted; the source holds the last failure.
    #[error("Request failed after {attempts} retries")]
    RetriesExhausted { attempts: u32 },

    /// Too many subrequests for a single composite call.
    #[error("Composite request holds {count} subrequests, the limit is {limit}")]
    CompositeCapacity { count: usize, limit: usize },

    /// A subrequest depends on another subrequest that did not succeed.
    #[error("Subrequest '{reference_id}' references '{dependency}' which did not succeed")]
    DanglingReference {
        reference_id: String,
        dependency: String,
    },

    /// An external id matched more than one record (HTTP 300).
    #[error("More than one record matched: {}", urls.join(", "))]
    MoreThanOneRecord { urls: Vec<String> },

    /// A subrequest result was read before its composite call executed.
    #[error("Subrequest '{0}' has not been executed")]
    NotExecuted(String),

    /// Several subrequests of one composite call failed.
    #[error("{} subrequests failed", .0.len())]
    CompositeFailures(Vec<Error>),

    /// API version string is not in the `NN.0` form.
    #[error("Invalid API version '{0}', expected a value like '62.0'")]
    InvalidApiVersion(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        let kind = match err.kind {
            TransportErrorKind::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::Transport(err.message.clone()),
        };
        Error::with_source(kind, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::InvalidUrl(err.to_string()), err)
    }
}
