//! Composite batch requests: up to 25 independent subrequests in one call.

use std::collections::HashMap;

use relay_sf_client::{Request, RequestMethod, SalesforceClient};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::builder::{Accumulator, SobjectSubrequests};
use crate::composite::{correlate, raise_failures, unescape_strings};
use crate::error::{Error, ErrorKind, Result};
use crate::subrequest::{kind, Outcome, Subrequest};
use crate::wire::{CompositeBatchRequest, CompositeBatchResponse, CompositeBatchSubrequest};

/// Error code the server reports for subrequests not run after a failure.
const BATCH_PROCESSING_HALTED: &str = "BATCH_PROCESSING_HALTED";

/// Names of the binary body part a subrequest reads from in a multipart
/// batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPart {
    /// Name of the binary part in the multipart request.
    pub name: String,
    /// `name` parameter in the part's `Content-Disposition` header.
    pub alias: String,
}

impl BinaryPart {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }
}

/// A composite batch request under construction.
///
/// Subrequests cannot reference each other. With `halt_on_error`, the
/// subrequests after the first failure are not executed and their handles
/// report [`Outcome::Skipped`].
#[derive(Debug)]
pub struct CompositeBatch {
    client: SalesforceClient,
    acc: Accumulator,
    binary_parts: HashMap<String, BinaryPart>,
    halt_on_error: bool,
    autoraise: bool,
    group_errors: bool,
}

impl CompositeBatch {
    pub fn new(client: &SalesforceClient) -> Self {
        Self {
            acc: Accumulator::new(client.api_version()),
            client: client.clone(),
            binary_parts: HashMap::new(),
            halt_on_error: false,
            autoraise: false,
            group_errors: false,
        }
    }

    /// Stop processing after the first failed subrequest.
    pub fn with_halt_on_error(mut self, halt_on_error: bool) -> Self {
        self.halt_on_error = halt_on_error;
        self
    }

    /// Fail `execute` if any subrequest failed.
    pub fn with_autoraise(mut self, autoraise: bool) -> Self {
        self.autoraise = autoraise;
        self
    }

    /// With autoraise, report every failure instead of only the first.
    pub fn with_group_errors(mut self, group_errors: bool) -> Self {
        self.group_errors = group_errors;
        self
    }

    pub fn len(&self) -> usize {
        self.acc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acc.entries.is_empty()
    }

    /// Add a raw subrequest.
    pub fn add(
        &mut self,
        method: RequestMethod,
        url: impl Into<String>,
        rich_input: Option<Value>,
    ) -> Result<Subrequest> {
        self.acc.push("Subrequest", method, url.into(), rich_input)
    }

    /// Add a raw subrequest whose input is a binary part of the request.
    pub fn add_with_binary_part(
        &mut self,
        method: RequestMethod,
        url: impl Into<String>,
        rich_input: Option<Value>,
        binary_part: BinaryPart,
    ) -> Result<Subrequest> {
        let subrequest = self.add(method, url, rich_input)?;
        self.binary_parts
            .insert(subrequest.reference_id().to_string(), binary_part);
        Ok(subrequest)
    }

    /// Run a SOQL query.
    pub fn query(&mut self, soql: &str) -> Result<Subrequest<kind::Query>> {
        self.acc.query(soql, false)
    }

    /// Run a SOQL query including deleted and archived records.
    pub fn query_all(&mut self, soql: &str) -> Result<Subrequest<kind::Query>> {
        self.acc.query(soql, true)
    }

    /// sObject operations.
    pub fn sobject(&mut self) -> SobjectSubrequests<'_> {
        SobjectSubrequests::new(&mut self.acc)
    }

    /// Send every subrequest in one call and bind the results.
    #[instrument(skip(self), fields(subrequests = self.acc.entries.len(), halt_on_error = self.halt_on_error))]
    pub async fn execute(self) -> Result<()> {
        let entries = &self.acc.entries;
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(entry) = entries.iter().find(|entry| !entry.references().is_empty()) {
            return Err(Error::new(ErrorKind::InvalidInput(format!(
                "batch subrequest '{}' contains a reference; use a composite request",
                entry.reference_id
            ))));
        }

        let payload = CompositeBatchRequest {
            halt_on_error: self.halt_on_error,
            batch_requests: entries
                .iter()
                .map(|entry| {
                    let binary_part = self.binary_parts.get(&entry.reference_id);
                    CompositeBatchSubrequest {
                        method: entry.method.to_string(),
                        url: entry.url.clone(),
                        rich_input: entry.body.clone(),
                        binary_part_name: binary_part.map(|part| part.name.clone()),
                        binary_part_name_alias: binary_part.map(|part| part.alias.clone()),
                    }
                })
                .collect(),
        };

        let request = Request::post(self.client.rest_url("composite/batch"))
            .header("Accept", "application/json")
            .json(&payload)?;
        let response = self.client.execute(request).await?;
        let parsed: CompositeBatchResponse = response.json()?;
        debug!(
            results = parsed.results.len(),
            has_errors = parsed.has_errors,
            "Composite batch returned"
        );

        let results = parsed
            .results
            .into_iter()
            .map(|mut sub| {
                unescape_strings(&mut sub.result);
                let outcome = if is_halted(&sub.result) {
                    Outcome::Skipped
                } else {
                    Outcome::Completed {
                        status: sub.status_code,
                        body: sub.result,
                        headers: Default::default(),
                    }
                };
                (sub.reference_id, outcome)
            })
            .collect();

        for (entry, outcome) in entries.iter().zip(correlate(entries, results)) {
            entry.bind(outcome);
        }

        if self.autoraise {
            raise_failures(entries, self.group_errors)?;
        }
        Ok(())
    }
}

fn is_halted(result: &Value) -> bool {
    result.as_array().is_some_and(|errors| {
        errors
            .iter()
            .any(|e| e.get("errorCode").and_then(Value::as_str) == Some(BATCH_PROCESSING_HALTED))
    })
}
