//! Salesforce REST API client.
//!
//! This client wraps `SalesforceClient` from `relay-sf-client` and provides
//! typed sObject CRUD, queries, and composite/batch builders.

use serde::{de::DeserializeOwned, Serialize};
use tracing::instrument;

use relay_sf_client::{Request, SalesforceClient};

use crate::batch::CompositeBatch;
use crate::builder::strip_external_id;
use crate::composite::Composite;
use crate::error::{Error, ErrorKind, Result};
use crate::sobject::{CreateResult, UpsertResult};
use crate::validate;

/// Salesforce REST API client.
///
/// # Example
///
/// ```rust,ignore
/// use relay_sf_rest::SalesforceRestClient;
///
/// let rest = SalesforceRestClient::from_client(client);
///
/// let id = rest.create("Account", &json!({"Name": "New Account"})).await?;
/// rest.update("Account", &id, &json!({"Name": "Updated"})).await?;
/// rest.delete("Account", &id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SalesforceRestClient {
    client: SalesforceClient,
}

impl SalesforceRestClient {
    /// Create a REST client from an existing SalesforceClient.
    pub fn from_client(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// Get the underlying SalesforceClient.
    pub fn inner(&self) -> &SalesforceClient {
        &self.client
    }

    /// Start a composite request.
    pub fn composite(&self) -> Composite {
        Composite::new(&self.client)
    }

    /// Start a composite batch request.
    pub fn composite_batch(&self) -> CompositeBatch {
        CompositeBatch::new(&self.client)
    }

    /// Org limits.
    pub async fn limits(&self) -> Result<serde_json::Value> {
        Ok(self.client.limits().await?)
    }

    // =========================================================================
    // Query Operations
    // =========================================================================

    /// Execute a SOQL query and return every page of results.
    #[instrument(skip(self))]
    pub async fn query<T: DeserializeOwned>(&self, soql: &str) -> Result<Vec<T>> {
        Ok(self.client.query(soql).await?)
    }

    /// Like [`query`](Self::query) but includes deleted and archived records.
    #[instrument(skip(self))]
    pub async fn query_all<T: DeserializeOwned>(&self, soql: &str) -> Result<Vec<T>> {
        Ok(self.client.query_all(soql).await?)
    }

    // =========================================================================
    // CRUD Operations
    // =========================================================================

    /// Create a new record.
    ///
    /// Returns the ID of the created record.
    #[instrument(skip(self, record))]
    pub async fn create<T: Serialize + ?Sized>(&self, sobject: &str, record: &T) -> Result<String> {
        let sobject = validate::sobject_name(sobject)?;
        let url = self.client.rest_url(&format!("sobjects/{sobject}"));
        let result: CreateResult = self.client.post_json(&url, record).await?;

        if result.success {
            Ok(result.id)
        } else {
            let errors: Vec<String> = result.errors.iter().map(|e| e.message.clone()).collect();
            Err(Error::new(ErrorKind::InvalidInput(format!(
                "create failed: {}",
                errors.join("; ")
            ))))
        }
    }

    /// Get a record by ID.
    ///
    /// Optionally specify which fields to retrieve.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        sobject: &str,
        id: &str,
        fields: Option<&[&str]>,
    ) -> Result<T> {
        let sobject = validate::sobject_name(sobject)?;
        let id = validate::record_id(id)?;
        let url = self.client.rest_url(&format!("sobjects/{sobject}/{id}"));
        self.get_with_fields(url, fields).await
    }

    /// Get a record by external ID.
    ///
    /// Fails with `MoreThanOneRecord` when the value matches several records.
    #[instrument(skip(self))]
    pub async fn get_by_external_id<T: DeserializeOwned>(
        &self,
        sobject: &str,
        external_id_field: &str,
        external_id: &str,
        fields: Option<&[&str]>,
    ) -> Result<T> {
        let url = self.external_id_url(sobject, external_id_field, external_id)?;
        self.get_with_fields(url, fields).await
    }

    async fn get_with_fields<T: DeserializeOwned>(
        &self,
        url: String,
        fields: Option<&[&str]>,
    ) -> Result<T> {
        let mut request = Request::get(url);
        if let Some(fields) = fields {
            let fields = fields
                .iter()
                .map(|field| validate::field_name(field))
                .collect::<Result<Vec<_>>>()?;
            request = request.query("fields", fields.join(","));
        }
        let response = self.client.execute(request).await?;
        Ok(response.json()?)
    }

    /// Update a record.
    #[instrument(skip(self, record))]
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        sobject: &str,
        id: &str,
        record: &T,
    ) -> Result<()> {
        let sobject = validate::sobject_name(sobject)?;
        let id = validate::record_id(id)?;
        let url = self.client.rest_url(&format!("sobjects/{sobject}/{id}"));
        Ok(self.client.patch_json(&url, record).await?)
    }

    /// Delete a record.
    #[instrument(skip(self))]
    pub async fn delete(&self, sobject: &str, id: &str) -> Result<()> {
        let sobject = validate::sobject_name(sobject)?;
        let id = validate::record_id(id)?;
        let url = self.client.rest_url(&format!("sobjects/{sobject}/{id}"));
        Ok(self.client.delete_request(&url).await?)
    }

    /// Delete a record by external ID.
    #[instrument(skip(self))]
    pub async fn delete_by_external_id(
        &self,
        sobject: &str,
        external_id_field: &str,
        external_id: &str,
    ) -> Result<()> {
        let url = self.external_id_url(sobject, external_id_field, external_id)?;
        Ok(self.client.delete_request(&url).await?)
    }

    /// Upsert a record using an external ID field.
    ///
    /// Creates the record if it doesn't exist, updates it if it does. If the
    /// record carries the external ID field it must match `external_id`; it
    /// is removed from the payload.
    #[instrument(skip(self, record))]
    pub async fn upsert<T: Serialize + ?Sized>(
        &self,
        sobject: &str,
        external_id_field: &str,
        external_id: &str,
        record: &T,
    ) -> Result<UpsertResult> {
        let url = self.external_id_url(sobject, external_id_field, external_id)?;
        let body = strip_external_id(serde_json::to_value(record)?, external_id_field, external_id)?;
        let response = self
            .client
            .execute(Request::patch(url).json_value(&body))
            .await?;

        // 201 Created or 200 OK carry a body; older API versions answer an
        // update with 204 No Content
        if response.bytes().is_empty() {
            Ok(UpsertResult {
                id: external_id.to_string(),
                success: true,
                created: response.status() == 201,
                errors: vec![],
            })
        } else {
            Ok(response.json()?)
        }
    }

    fn external_id_url(
        &self,
        sobject: &str,
        external_id_field: &str,
        external_id: &str,
    ) -> Result<String> {
        let sobject = validate::sobject_name(sobject)?;
        let field = validate::field_name(external_id_field)?;
        let encoded = urlencoding::encode(external_id);
        Ok(self
            .client
            .rest_url(&format!("sobjects/{sobject}/{field}/{encoded}")))
    }
}
