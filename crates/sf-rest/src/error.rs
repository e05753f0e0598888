//! Error types for sf-rest.

/// Result type alias for sf-rest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-rest operations.
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

    /// The underlying client error, if this error came from the executor or
    /// from a subrequest result.
    pub fn client_error(&self) -> Option<&relay_sf_client::Error> {
        match &self.kind {
            ErrorKind::Client(err) => Some(err),
            _ => None,
        }
    }

    /// Kind of the underlying client error.
    pub fn client_kind(&self) -> Option<&relay_sf_client::ErrorKind> {
        self.client_error().map(|err| &err.kind)
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Error reported by the client or by a subrequest.
    #[error("{0}")]
    Client(relay_sf_client::Error),

    /// Invalid argument, rejected before anything is sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reference id already used in this composite request.
    #[error("Reference ID '{0}' is already in use")]
    DuplicateReference(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<relay_sf_client::Error> for Error {
    fn from(err: relay_sf_client::Error) -> Self {
        Error::new(ErrorKind::Client(err))
    }
}

impl From<relay_sf_client::ErrorKind> for Error {
    fn from(kind: relay_sf_client::ErrorKind) -> Self {
        Error::new(ErrorKind::Client(relay_sf_client::Error::new(kind)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<Error> for relay_sf_client::Error {
    fn from(err: Error) -> Self {
        match err.kind {
            ErrorKind::Client(inner) => inner,
            ErrorKind::Json(message) => {
                relay_sf_client::Error::new(relay_sf_client::ErrorKind::Json(message))
            }
            other => {
                relay_sf_client::Error::new(relay_sf_client::ErrorKind::Other(other.to_string()))
            }
        }
    }
}
