//! Subrequest accumulation shared by composite and batch requests.

use std::collections::HashMap;
use std::sync::Arc;

use relay_sf_client::{ErrorKind as ClientErrorKind, RequestMethod};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::subrequest::{kind, Entry, Subrequest};
use crate::validate;

/// Maximum subrequests in one composite or batch call.
pub const MAX_SUBREQUESTS: usize = 25;

/// Ordered subrequests plus the per-name reference id counters.
#[derive(Debug)]
pub(crate) struct Accumulator {
    api_version: String,
    pub entries: Vec<Arc<Entry>>,
    counters: HashMap<String, usize>,
}

impl Accumulator {
    pub fn new(api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            entries: Vec::new(),
            counters: HashMap::new(),
        }
    }

    /// `/services/data/vNN.0/{path}`
    pub fn data_path(&self, path: &str) -> String {
        format!("/services/data/v{}/{}", self.api_version, path)
    }

    /// Next id for `name`: `Account_create_0`, `Account_create_1`, ...
    /// Counters are case-insensitive per name.
    pub fn next_reference_id(&mut self, name: &str) -> String {
        let counter = self.counters.entry(name.to_ascii_lowercase()).or_insert(0);
        let id = format!("{name}_{counter}");
        *counter += 1;
        id
    }

    /// Add a subrequest under a generated id.
    pub fn push<K>(
        &mut self,
        name: &str,
        method: RequestMethod,
        url: String,
        body: Option<Value>,
    ) -> Result<Subrequest<K>> {
        self.ensure_capacity()?;
        let reference_id = self.next_reference_id(name);
        self.push_with_id(reference_id, method, url, body)
    }

    /// Add a subrequest under an explicit id.
    pub fn push_with_id<K>(
        &mut self,
        reference_id: String,
        method: RequestMethod,
        url: String,
        body: Option<Value>,
    ) -> Result<Subrequest<K>> {
        self.ensure_capacity()?;
        validate::reference_id(&reference_id)?;
        if self.entries.iter().any(|e| e.reference_id == reference_id) {
            return Err(Error::new(ErrorKind::DuplicateReference(reference_id)));
        }
        let entry = Arc::new(Entry::new(reference_id, method, url, body));
        self.entries.push(Arc::clone(&entry));
        Ok(Subrequest::new(entry))
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.entries.len() >= MAX_SUBREQUESTS {
            return Err(ClientErrorKind::CompositeCapacity {
                count: self.entries.len() + 1,
                limit: MAX_SUBREQUESTS,
            }
            .into());
        }
        Ok(())
    }

    pub fn query<K>(&mut self, soql: &str, include_all_records: bool) -> Result<Subrequest<K>> {
        let endpoint = if include_all_records { "queryAll" } else { "query" };
        let url = format!(
            "{}?q={}",
            self.data_path(endpoint),
            urlencoding::encode(soql)
        );
        self.push("Query", RequestMethod::Get, url, None)
    }
}

/// sObject operations inside a composite or batch request.
///
/// Record ids may be [`Reference`](crate::Reference) expressions such as
/// `@{Account_create_0.id}` in a composite request.
#[derive(Debug)]
pub struct SobjectSubrequests<'a> {
    acc: &'a mut Accumulator,
}

impl<'a> SobjectSubrequests<'a> {
    pub(crate) fn new(acc: &'a mut Accumulator) -> Self {
        Self { acc }
    }

    fn sobject_path(&self, sobject: &str) -> Result<String> {
        let sobject = validate::sobject_name(sobject)?;
        Ok(self.acc.data_path(&format!("sobjects/{sobject}")))
    }

    fn record_path(&self, sobject: &str, id: &str, external_id_field: Option<&str>) -> Result<String> {
        let base = self.sobject_path(sobject)?;
        Ok(match external_id_field {
            Some(field) => format!(
                "{base}/{}/{}",
                validate::field_name(field)?,
                validate::id_segment(id)
            ),
            None => format!("{base}/{}", validate::id_segment(id)),
        })
    }

    /// Create a new record.
    pub fn create<T: Serialize + ?Sized>(&mut self, sobject: &str, data: &T) -> Result<Subrequest<kind::Create>> {
        let url = self.sobject_path(sobject)?;
        let body = serde_json::to_value(data)?;
        self.acc.push(&format!("{sobject}_create"), RequestMethod::Post, url, Some(body))
    }

    /// Get a record by id, or by external id when `external_id_field` is set.
    pub fn get(
        &mut self,
        sobject: &str,
        id: &str,
        external_id_field: Option<&str>,
        fields: Option<&[&str]>,
    ) -> Result<Subrequest<kind::Get>> {
        let mut url = self.record_path(sobject, id, external_id_field)?;
        if let Some(fields) = fields {
            let fields = fields
                .iter()
                .map(|field| validate::field_name(field))
                .collect::<Result<Vec<_>>>()?;
            url.push_str("?fields=");
            url.push_str(&fields.join(","));
        }
        self.acc.push(&format!("{sobject}_get"), RequestMethod::Get, url, None)
    }

    /// Update a record by id.
    pub fn update<T: Serialize + ?Sized>(&mut self, sobject: &str, id: &str, data: &T) -> Result<Subrequest> {
        let url = self.record_path(sobject, id, None)?;
        let body = serde_json::to_value(data)?;
        self.acc.push(&format!("{sobject}_update"), RequestMethod::Patch, url, Some(body))
    }

    /// Delete a record by id, or by external id when `external_id_field` is set.
    pub fn delete(&mut self, sobject: &str, id: &str, external_id_field: Option<&str>) -> Result<Subrequest> {
        let url = self.record_path(sobject, id, external_id_field)?;
        self.acc.push(&format!("{sobject}_delete"), RequestMethod::Delete, url, None)
    }

    /// Upsert a record by external id.
    ///
    /// If `data` carries the external id field it must equal `id`; it is
    /// removed from the payload since Salesforce rejects it there.
    pub fn upsert<T: Serialize + ?Sized>(
        &mut self,
        sobject: &str,
        id: &str,
        external_id_field: &str,
        data: &T,
    ) -> Result<Subrequest<kind::Upsert>> {
        let url = self.record_path(sobject, id, Some(external_id_field))?;
        let body = strip_external_id(serde_json::to_value(data)?, external_id_field, id)?;
        self.acc.push(&format!("{sobject}_upsert"), RequestMethod::Patch, url, Some(body))
    }
}

/// Remove `field` from an upsert payload after checking it matches `id`.
pub(crate) fn strip_external_id(mut body: Value, field: &str, id: &str) -> Result<Value> {
    let Value::Object(map) = &mut body else {
        return Err(Error::new(ErrorKind::InvalidInput(
            "upsert data must be a JSON object".to_string(),
        )));
    };
    if let Some(value) = map.get(field) {
        let matches = match value {
            Value::String(s) => s == id,
            other => other.to_string() == id,
        };
        if !matches {
            return Err(Error::new(ErrorKind::InvalidInput(format!(
                "external id field '{field}' in data ({value}) does not match the provided external id {id}"
            ))));
        }
        map.remove(field);
    }
    Ok(body)
}
