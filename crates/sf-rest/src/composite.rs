//! Composite requests: up to 25 subrequests in one call, where later
//! subrequests may reference the results of earlier ones.

use std::collections::HashMap;
use std::sync::Arc;

use relay_sf_client::{ErrorKind as ClientErrorKind, Request, RequestMethod, SalesforceClient};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::builder::{Accumulator, SobjectSubrequests};
use crate::error::{Error, ErrorKind, Result};
use crate::reference::substitute;
use crate::subrequest::{kind, outcome_error, Entry, Outcome, Subrequest};
use crate::wire::{CompositeRequest, CompositeResponse, CompositeSubrequest};

/// A composite request under construction.
///
/// Subrequests execute in order on the server inside one API call. Results
/// are bound to each [`Subrequest`] handle when [`execute`](Self::execute)
/// returns.
///
/// # Example
///
/// ```rust,ignore
/// let mut composite = Composite::new(&client);
/// let account = composite.sobject().create("Account", &json!({"Name": "Acme"}))?;
/// let contact = composite.sobject().create(
///     "Contact",
///     &json!({"LastName": "Doe", "AccountId": account.reference().id()}),
/// )?;
/// composite.execute().await?;
/// println!("{} {}", account.id()?, contact.id()?);
/// ```
#[derive(Debug)]
pub struct Composite {
    client: SalesforceClient,
    acc: Accumulator,
    all_or_none: bool,
    collate_subrequests: bool,
    autoraise: bool,
    group_errors: bool,
}

impl Composite {
    pub fn new(client: &SalesforceClient) -> Self {
        Self {
            acc: Accumulator::new(client.api_version()),
            client: client.clone(),
            all_or_none: false,
            collate_subrequests: true,
            autoraise: false,
            group_errors: false,
        }
    }

    /// Roll back every subrequest if any of them fails.
    pub fn with_all_or_none(mut self, all_or_none: bool) -> Self {
        self.all_or_none = all_or_none;
        self
    }

    /// Let the server run independent subrequests in parallel.
    pub fn with_collate_subrequests(mut self, collate: bool) -> Self {
        self.collate_subrequests = collate;
        self
    }

    /// Fail `execute` if any subrequest failed.
    pub fn with_autoraise(mut self, autoraise: bool) -> Self {
        self.autoraise = autoraise;
        self
    }

    /// With autoraise, report every failure as one `CompositeFailures`
    /// error instead of only the first.
    pub fn with_group_errors(mut self, group_errors: bool) -> Self {
        self.group_errors = group_errors;
        self
    }

    /// Number of subrequests added so far.
    pub fn len(&self) -> usize {
        self.acc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acc.entries.is_empty()
    }

    /// Generate a unique reference id such as `Query_0` or `Contact_create_3`.
    pub fn reference_id(&mut self, name: &str) -> String {
        self.acc.next_reference_id(name)
    }

    /// Add a raw subrequest. `url` is relative to the instance, for example
    /// `/services/data/v62.0/sobjects/Account`.
    ///
    /// `reference_id` may only contain letters, digits and underscores.
    pub fn add(
        &mut self,
        reference_id: impl Into<String>,
        method: RequestMethod,
        url: impl Into<String>,
        body: Option<Value>,
    ) -> Result<Subrequest> {
        self.acc
            .push_with_id(reference_id.into(), method, url.into(), body)
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
    ///
    /// An empty composite returns without a network call.
    #[instrument(skip(self), fields(subrequests = self.acc.entries.len(), all_or_none = self.all_or_none))]
    pub async fn execute(self) -> Result<()> {
        let entries = &self.acc.entries;
        if entries.is_empty() {
            return Ok(());
        }
        check_reference_order(entries)?;

        let payload = CompositeRequest {
            all_or_none: self.all_or_none,
            collate_subrequests: self.collate_subrequests,
            subrequests: entries
                .iter()
                .map(|entry| CompositeSubrequest {
                    method: entry.method.to_string(),
                    url: entry.url.clone(),
                    reference_id: entry.reference_id.clone(),
                    body: entry.body.clone(),
                })
                .collect(),
        };

        let request = Request::post(self.client.rest_url("composite"))
            .header("Accept", "application/json")
            .json(&payload)?;
        let response = self.client.execute(request).await?;
        let parsed: CompositeResponse = response.json()?;
        debug!(results = parsed.responses.len(), "Composite request returned");

        let results = parsed
            .responses
            .into_iter()
            .map(|mut sub| {
                unescape_strings(&mut sub.body);
                let outcome = Outcome::Completed {
                    status: sub.http_status_code,
                    body: sub.body,
                    headers: sub.http_headers,
                };
                (sub.reference_id, outcome)
            })
            .collect();

        let mut outcomes = correlate(entries, results);
        if !self.all_or_none {
            mark_dangling(entries, &mut outcomes);
        }
        bind_resolved_bodies(entries, &outcomes);
        for (entry, outcome) in entries.iter().zip(outcomes) {
            entry.bind(outcome);
        }

        if self.autoraise {
            raise_failures(entries, self.group_errors)?;
        }
        Ok(())
    }
}

/// Every reference must point at an earlier subrequest.
fn check_reference_order(entries: &[Arc<Entry>]) -> Result<()> {
    for (position, entry) in entries.iter().enumerate() {
        for reference in entry.references() {
            let known = entries[..position]
                .iter()
                .any(|earlier| earlier.reference_id == reference.reference_id());
            if !known {
                return Err(Error::new(ErrorKind::InvalidInput(format!(
                    "subrequest '{}' references '{}' which is not an earlier subrequest",
                    entry.reference_id,
                    reference.reference_id()
                ))));
            }
        }
    }
    Ok(())
}

/// Match results to subrequests by echoed reference id, falling back to
/// request order. Subrequests left without a result are skipped.
pub(crate) fn correlate(
    entries: &[Arc<Entry>],
    results: Vec<(Option<String>, Outcome)>,
) -> Vec<Outcome> {
    let positions: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.reference_id.as_str(), i))
        .collect();
    let mut slots: Vec<Option<Outcome>> = vec![None; entries.len()];

    for (reference_id, outcome) in results {
        let by_id = reference_id
            .as_deref()
            .and_then(|id| positions.get(id).copied())
            .filter(|&i| slots[i].is_none());
        let Some(position) = by_id.or_else(|| slots.iter().position(Option::is_none)) else {
            warn!(?reference_id, "Composite result has no matching subrequest");
            continue;
        };
        slots[position] = Some(outcome);
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Outcome::Skipped))
        .collect()
}

/// A failed subrequest that referenced a failed dependency reports the
/// dependency instead of the server's generic error. Chains propagate in
/// order.
fn mark_dangling(entries: &[Arc<Entry>], outcomes: &mut [Outcome]) {
    let positions: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.reference_id.as_str(), i))
        .collect();

    for (position, entry) in entries.iter().enumerate() {
        if outcomes[position].is_success() {
            continue;
        }
        let failed_dependency = entry.references().into_iter().find_map(|reference| {
            positions
                .get(reference.reference_id())
                .copied()
                .filter(|&dep| dep < position && !outcomes[dep].is_success())
        });
        if let Some(dep) = failed_dependency {
            let status = outcomes[position].status();
            let body = outcomes[position].body().cloned().unwrap_or(Value::Null);
            outcomes[position] = Outcome::DanglingReference {
                dependency: entries[dep].reference_id.clone(),
                status,
                body,
            };
        }
    }
}

/// Substitute references in request bodies with the values they resolved to.
fn bind_resolved_bodies(entries: &[Arc<Entry>], outcomes: &[Outcome]) {
    let positions: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.reference_id.as_str(), i))
        .collect();
    let lookup = |reference_id: &str| {
        positions
            .get(reference_id)
            .map(|&i| &outcomes[i])
            .filter(|outcome| outcome.is_success())
            .and_then(Outcome::body)
    };

    for entry in entries {
        if let Some(body) = &entry.body {
            if !entry.references().is_empty() {
                let _ = entry.resolved_body.set(substitute(body, &lookup));
            }
        }
    }
}

/// Salesforce HTML-escapes string values in composite responses.
pub(crate) fn unescape_strings(value: &mut Value) {
    match value {
        Value::String(text) if text.contains('&') => {
            let unescaped = quick_xml::escape::unescape(text).map(|s| s.into_owned());
            if let Ok(unescaped) = unescaped {
                *text = unescaped;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(unescape_strings),
        Value::Object(map) => map.values_mut().for_each(unescape_strings),
        _ => {}
    }
}

/// Collect subrequest failures into the error `execute` reports.
pub(crate) fn raise_failures(entries: &[Arc<Entry>], group_errors: bool) -> Result<()> {
    let mut errors: Vec<relay_sf_client::Error> = entries
        .iter()
        .filter_map(|entry| {
            entry
                .outcome
                .get()
                .and_then(|outcome| outcome_error(&entry.reference_id, outcome))
        })
        .collect();

    if errors.is_empty() {
        return Ok(());
    }
    warn!(failed = errors.len(), "Composite subrequests failed");
    if group_errors {
        Err(ClientErrorKind::CompositeFailures(errors).into())
    } else {
        Err(errors.swap_remove(0).into())
    }
}
