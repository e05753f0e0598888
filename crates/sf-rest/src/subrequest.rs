//! Subrequest handles and their write-once result slots.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use relay_sf_client::{parse_error_response, ErrorKind as ClientErrorKind, RequestMethod};
use serde_json::Value;

use crate::error::Result;
use crate::reference::Reference;

static NULL: Value = Value::Null;

/// Markers selecting the typed accessors available on a [`Subrequest`].
pub mod kind {
    /// Any subrequest: update, delete or a raw request.
    #[derive(Debug, Clone, Copy)]
    pub struct Generic;
    /// SOQL query; exposes `records()`.
    #[derive(Debug, Clone, Copy)]
    pub struct Query;
    /// sObject create; exposes `id()`.
    #[derive(Debug, Clone, Copy)]
    pub struct Create;
    /// sObject get; exposes `record()`.
    #[derive(Debug, Clone, Copy)]
    pub struct Get;
    /// sObject upsert; exposes `id()` and `created()`.
    #[derive(Debug, Clone, Copy)]
    pub struct Upsert;
}

/// What happened to a subrequest once its composite call returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The server executed it.
    Completed {
        status: u16,
        body: Value,
        headers: serde_json::Map<String, Value>,
    },
    /// Never executed: an earlier subrequest failed with `halt_on_error`,
    /// or the server returned no result for it.
    Skipped,
    /// It referenced a subrequest that did not succeed.
    DanglingReference {
        dependency: String,
        status: Option<u16>,
        body: Value,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed { status, .. } if (200..300).contains(status))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Completed { status, .. } => Some(*status),
            Outcome::DanglingReference { status, .. } => *status,
            Outcome::Skipped => None,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            Outcome::Completed { body, .. } | Outcome::DanglingReference { body, .. } => Some(body),
            Outcome::Skipped => None,
        }
    }
}

/// Shared state behind a subrequest handle.
#[derive(Debug)]
pub(crate) struct Entry {
    pub reference_id: String,
    pub method: RequestMethod,
    pub url: String,
    pub body: Option<Value>,
    pub outcome: OnceLock<Outcome>,
    /// Body with references replaced by the values they resolved to.
    pub resolved_body: OnceLock<Value>,
}

impl Entry {
    pub fn new(reference_id: String, method: RequestMethod, url: String, body: Option<Value>) -> Self {
        Self {
            reference_id,
            method,
            url,
            body,
            outcome: OnceLock::new(),
            resolved_body: OnceLock::new(),
        }
    }

    /// References embedded in the url and body.
    pub fn references(&self) -> Vec<Reference> {
        let mut found = Reference::find_all(&self.url);
        if let Some(body) = &self.body {
            crate::reference::references_in_value(body, &mut found);
        }
        found
    }

    /// Bind the result. Later calls are ignored.
    pub fn bind(&self, outcome: Outcome) {
        let _ = self.outcome.set(outcome);
    }
}

/// Handle to one operation inside a composite or batch request.
///
/// The result slot is filled exactly once when the owning request executes;
/// reading it earlier fails with `NotExecuted`.
pub struct Subrequest<K = kind::Generic> {
    entry: Arc<Entry>,
    _kind: PhantomData<K>,
}

impl<K> Clone for Subrequest<K> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            _kind: PhantomData,
        }
    }
}

impl<K> fmt::Debug for Subrequest<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subrequest")
            .field("reference_id", &self.entry.reference_id)
            .field("method", &self.entry.method)
            .field("url", &self.entry.url)
            .field("outcome", &self.entry.outcome.get())
            .finish()
    }
}

impl<K> Subrequest<K> {
    pub(crate) fn new(entry: Arc<Entry>) -> Self {
        Self {
            entry,
            _kind: PhantomData,
        }
    }

    pub fn reference_id(&self) -> &str {
        &self.entry.reference_id
    }

    pub fn method(&self) -> RequestMethod {
        self.entry.method
    }

    pub fn url(&self) -> &str {
        &self.entry.url
    }

    /// Request body as sent, references unresolved.
    pub fn request_body(&self) -> Option<&Value> {
        self.entry.body.as_ref()
    }

    /// Reference to this subrequest's result for use in later subrequests.
    pub fn reference(&self) -> Reference {
        Reference::new(self.entry.reference_id.clone())
    }

    /// Whether the owning request has executed.
    pub fn is_done(&self) -> bool {
        self.entry.outcome.get().is_some()
    }

    /// The bound result.
    pub fn outcome(&self) -> Result<&Outcome> {
        self.entry
            .outcome
            .get()
            .ok_or_else(|| ClientErrorKind::NotExecuted(self.entry.reference_id.clone()).into())
    }

    /// HTTP status of the subrequest, `None` when it was skipped.
    pub fn status(&self) -> Result<Option<u16>> {
        Ok(self.outcome()?.status())
    }

    pub fn is_success(&self) -> Result<bool> {
        Ok(self.outcome()?.is_success())
    }

    /// Raw response body.
    pub fn response_body(&self) -> Result<Option<&Value>> {
        Ok(self.outcome()?.body())
    }

    /// Request body with every reference replaced by the value it pointed
    /// to, once the request executed and the dependencies succeeded.
    pub fn resolved_body(&self) -> Result<Option<&Value>> {
        self.outcome()?;
        Ok(self.entry.resolved_body.get().or(self.entry.body.as_ref()))
    }

    /// Fail with this subrequest's own error if it did not succeed.
    pub fn error_for_status(&self) -> Result<()> {
        match outcome_error(&self.entry.reference_id, self.outcome()?) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Successful response body.
    fn success_body(&self) -> Result<&Value> {
        self.error_for_status()?;
        Ok(self.outcome()?.body().unwrap_or(&NULL))
    }

    fn body_field<'a>(&'a self, field: &str) -> Result<&'a Value> {
        self.success_body()?.get(field).ok_or_else(|| {
            crate::Error::new(crate::ErrorKind::Json(format!(
                "subrequest '{}' response has no '{field}' field",
                self.entry.reference_id
            )))
        })
    }
}

impl Subrequest<kind::Query> {
    /// Records of the query's first page.
    pub fn records(&self) -> Result<&[Value]> {
        self.body_field("records")?.as_array().map(Vec::as_slice).ok_or_else(|| {
            crate::Error::new(crate::ErrorKind::Json("'records' is not an array".to_string()))
        })
    }
}

impl Subrequest<kind::Create> {
    /// Id of the created record.
    pub fn id(&self) -> Result<&str> {
        string_field(self, "id")
    }
}

impl Subrequest<kind::Get> {
    /// The retrieved record.
    pub fn record(&self) -> Result<&Value> {
        self.success_body()
    }
}

impl Subrequest<kind::Upsert> {
    /// Id of the upserted record.
    pub fn id(&self) -> Result<&str> {
        string_field(self, "id")
    }

    /// Whether the upsert created a new record.
    pub fn created(&self) -> Result<bool> {
        self.body_field("created")?.as_bool().ok_or_else(|| {
            crate::Error::new(crate::ErrorKind::Json("'created' is not a boolean".to_string()))
        })
    }
}

fn string_field<'a, K>(subrequest: &'a Subrequest<K>, field: &str) -> Result<&'a str> {
    subrequest.body_field(field)?.as_str().ok_or_else(|| {
        crate::Error::new(crate::ErrorKind::Json(format!("'{field}' is not a string")))
    })
}

/// The client error a failed outcome stands for.
pub(crate) fn outcome_error(reference_id: &str, outcome: &Outcome) -> Option<relay_sf_client::Error> {
    match outcome {
        Outcome::Completed { status, body, .. } if !(200..300).contains(status) => {
            Some(parse_error_response(*status, &body.to_string()))
        }
        Outcome::Completed { .. } => None,
        Outcome::Skipped => Some(relay_sf_client::Error::new(ClientErrorKind::NotExecuted(
            reference_id.to_string(),
        ))),
        Outcome::DanglingReference { dependency, .. } => Some(relay_sf_client::Error::new(
            ClientErrorKind::DanglingReference {
                reference_id: reference_id.to_string(),
                dependency: dependency.clone(),
            },
        )),
    }
}
