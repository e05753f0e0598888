//! Bulk API 2.0 ingest client.
//!
//! Every call goes through [`SalesforceClient::execute`], so bulk traffic
//! shares the client's token cache, retry policy, admission gate and events.

use std::time::Duration;

use bytes::Bytes;
use futures::future::try_join_all;
use relay_sf_client::{Event, Request, SalesforceClient};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument};

use crate::error::{Error, ErrorKind, Result};
use crate::ingest_csv::{
    deserialize_ingest_results, estimate_batches, serialize_ingest_data, DEFAULT_MAX_RECORDS,
    DEFAULT_MAX_SIZE_BYTES,
};
use crate::types::*;

/// Default polling interval for job status checks.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum wait time for job completion.
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3600);

/// Options for an ingest operation.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Column order. Inferred from the records when absent.
    pub fieldnames: Option<Vec<String>>,
    /// Maximum size of one upload in bytes.
    pub max_size_bytes: usize,
    /// Maximum records in one upload.
    pub max_records: usize,
    /// External ID field, required for upsert.
    pub external_id_field: Option<String>,
    /// Assignment rule to run for a Case or a Lead.
    pub assignment_rule_id: Option<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            fieldnames: None,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_records: DEFAULT_MAX_RECORDS,
            external_id_field: None,
            assignment_rule_id: None,
        }
    }
}

impl IngestOptions {
    pub fn with_fieldnames<I, S>(mut self, fieldnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fieldnames = Some(fieldnames.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_assignment_rule_id(mut self, id: impl Into<String>) -> Self {
        self.assignment_rule_id = Some(id.into());
        self
    }

    fn job_request(&self, sobject: &str, operation: BulkOperation) -> CreateIngestJobRequest {
        let mut request = CreateIngestJobRequest::new(sobject, operation);
        if let Some(field) = &self.external_id_field {
            request = request.with_external_id_field(field.as_str());
        }
        if let Some(id) = &self.assignment_rule_id {
            request = request.with_assignment_rule_id(id.as_str());
        }
        request
    }
}

/// Salesforce Bulk API 2.0 ingest client.
///
/// Low-level job calls (create, upload, poll, results) plus high-level
/// [`insert`](Self::insert), [`update`](Self::update),
/// [`upsert`](Self::upsert) and [`delete`](Self::delete), which split the
/// records into CSV uploads, run one job per upload concurrently and merge
/// the results.
///
/// # Example
///
/// ```rust,ignore
/// use relay_sf_bulk::BulkApiClient;
///
/// let bulk = BulkApiClient::from_client(client);
/// let records = vec![serde_json::json!({"Name": "Acme"}).as_object().unwrap().clone()];
/// let result = bulk.insert("Account", &records, None).await?;
/// println!("{} created", result.successful_results.len());
/// ```
#[derive(Debug, Clone)]
pub struct BulkApiClient {
    client: SalesforceClient,
    poll_interval: Duration,
    max_wait: Duration,
}

impl BulkApiClient {
    /// Create a Bulk API client from an existing SalesforceClient.
    pub fn from_client(client: SalesforceClient) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Get the underlying SalesforceClient.
    pub fn inner(&self) -> &SalesforceClient {
        &self.client
    }

    /// Set the polling interval for job status checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum wait time for job completion.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn ingest_url(&self) -> String {
        self.client.rest_url("jobs/ingest")
    }

    fn job_url(&self, job_id: &str) -> Result<String> {
        if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::new(ErrorKind::InvalidInput(format!(
                "invalid job ID '{job_id}'"
            ))));
        }
        Ok(format!("{}/{}", self.ingest_url(), job_id))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let response = self
            .client
            .execute(request.header("Accept", "application/json"))
            .await?;
        Ok(response.json()?)
    }

    // =========================================================================
    // Ingest Job Operations
    // =========================================================================

    /// Create a new ingest job.
    #[instrument(skip(self, request), fields(object = %request.object, operation = request.operation.api_name()))]
    pub async fn create_ingest_job(&self, request: CreateIngestJobRequest) -> Result<IngestJob> {
        let job: IngestJob = self
            .send_json(Request::post(self.ingest_url()).json(&request)?)
            .await?;
        debug!(job_id = %job.id, "Created ingest job");
        Ok(job)
    }

    /// Get ingest job information.
    #[instrument(skip(self))]
    pub async fn get_ingest_job(&self, job_id: &str) -> Result<IngestJob> {
        self.send_json(Request::get(self.job_url(job_id)?)).await
    }

    /// List every ingest job in the org, following `nextRecordsUrl`.
    #[instrument(skip(self))]
    pub async fn list_ingest_jobs(&self, is_pk_chunking_enabled: Option<bool>) -> Result<Vec<IngestJob>> {
        let mut request = Request::get(self.ingest_url());
        if let Some(enabled) = is_pk_chunking_enabled {
            request = request.query("isPkChunkingEnabled", enabled.to_string());
        }

        let mut jobs = Vec::new();
        loop {
            let page: IngestJobList = self.send_json(request).await?;
            jobs.extend(page.records);
            match page.next_records_url {
                Some(next) => request = Request::get(self.client.url(&next)),
                None => return Ok(jobs),
            }
        }
    }

    /// Abort an ingest job.
    #[instrument(skip(self))]
    pub async fn abort_ingest_job(&self, job_id: &str) -> Result<IngestJob> {
        let request = Request::patch(self.job_url(job_id)?).json(&UpdateJobStateRequest::abort())?;
        self.send_json(request).await
    }

    /// Delete an ingest job.
    #[instrument(skip(self))]
    pub async fn delete_ingest_job(&self, job_id: &str) -> Result<()> {
        self.client
            .execute(Request::delete(self.job_url(job_id)?))
            .await?;
        Ok(())
    }

    /// Upload CSV data to an open job, then close it for processing.
    ///
    /// Publishes [`Event::BulkApiBatchConsumption`] with the estimated number
    /// of internal batches the upload consumes.
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn upload_job_data(&self, job_id: &str, data: Bytes) -> Result<IngestJob> {
        let url = self.job_url(job_id)?;
        let batches = estimate_batches(&data);

        let upload = Request::put(format!("{url}/batches"))
            .header("Content-Type", "text/csv")
            .with_body(data);
        self.client.execute(upload).await?;

        let close = Request::patch(url)
            .header("Accept", "application/json")
            .json(&UpdateJobStateRequest::upload_complete())?;
        let response = self.client.execute(close).await?;
        let job: IngestJob = response.json()?;

        self.client.events().publish(Event::BulkApiBatchConsumption {
            response,
            count: batches,
        });
        debug!(job_id, batches, state = ?job.state, "Uploaded ingest job data");
        Ok(job)
    }

    /// Poll a job until it reaches a terminal state.
    #[instrument(skip(self))]
    pub async fn wait_for_ingest_job(&self, job_id: &str) -> Result<IngestJob> {
        let start = Instant::now();

        loop {
            let job = self.get_ingest_job(job_id).await?;

            if job.state.is_terminal() {
                return Ok(job);
            }

            if start.elapsed() > self.max_wait {
                return Err(Error::new(ErrorKind::Timeout(format!(
                    "Job {} did not complete within {:?}",
                    job_id, self.max_wait
                ))));
            }

            sleep(self.poll_interval).await;
        }
    }

    async fn job_results(&self, job_id: &str, kind: &str) -> Result<Vec<ResultRow>> {
        let request = Request::get(format!("{}/{kind}", self.job_url(job_id)?)).header("Accept", "text/csv");
        let response = self.client.execute(request).await?;
        deserialize_ingest_results(response.bytes())
    }

    /// Records the job created or updated.
    pub async fn get_successful_results(&self, job_id: &str) -> Result<Vec<ResultRow>> {
        self.job_results(job_id, "successfulResults").await
    }

    /// Records the job rejected, with `sf__Error` describing why.
    pub async fn get_failed_results(&self, job_id: &str) -> Result<Vec<ResultRow>> {
        self.job_results(job_id, "failedResults").await
    }

    /// Records the job never processed, for example after an abort.
    pub async fn get_unprocessed_records(&self, job_id: &str) -> Result<Vec<ResultRow>> {
        self.job_results(job_id, "unprocessedrecords").await
    }

    // =========================================================================
    // High-Level Operations
    // =========================================================================

    /// Run one job over a single CSV upload: create, upload, wait, and fetch
    /// the three result sets concurrently.
    #[instrument(skip(self, data, options))]
    pub async fn execute_ingest(
        &self,
        sobject: &str,
        operation: BulkOperation,
        data: Bytes,
        options: &IngestOptions,
    ) -> Result<IngestJobResult> {
        let job = self
            .create_ingest_job(options.job_request(sobject, operation))
            .await?;
        let job = self.upload_job_data(&job.id, data).await?;
        let job = if job.state.is_terminal() {
            job
        } else {
            self.wait_for_ingest_job(&job.id).await?
        };

        let (successful_results, failed_results, unprocessed_records) = tokio::try_join!(
            self.get_successful_results(&job.id),
            self.get_failed_results(&job.id),
            self.get_unprocessed_records(&job.id),
        )?;

        Ok(IngestJobResult {
            job,
            successful_results,
            failed_results,
            unprocessed_records,
        })
    }

    /// Split records into uploads and run one job per upload concurrently.
    /// Results are returned in upload order.
    #[instrument(skip(self, records, options), fields(records = records.len()))]
    pub async fn perform_operation(
        &self,
        operation: BulkOperation,
        sobject: &str,
        records: &[Record],
        options: &IngestOptions,
    ) -> Result<Vec<IngestJobResult>> {
        let chunks = serialize_ingest_data(
            records,
            options.fieldnames.as_deref(),
            options.max_size_bytes,
            options.max_records,
        )?;
        info!(jobs = chunks.len(), "Starting bulk ingest");

        try_join_all(
            chunks
                .into_iter()
                .map(|chunk| self.execute_ingest(sobject, operation, chunk, options)),
        )
        .await
    }

    async fn aggregate(
        &self,
        operation: BulkOperation,
        sobject: &str,
        records: &[Record],
        options: &IngestOptions,
    ) -> Result<IngestResult> {
        let mut result = IngestResult::default();
        for job_result in self.perform_operation(operation, sobject, records, options).await? {
            result.extend(job_result);
        }
        Ok(result)
    }

    /// Create new records.
    pub async fn insert(
        &self,
        sobject: &str,
        records: &[Record],
        options: Option<IngestOptions>,
    ) -> Result<IngestResult> {
        let options = options.unwrap_or_default();
        self.aggregate(BulkOperation::Insert, sobject, records, &options).await
    }

    /// Update existing records by `Id`.
    pub async fn update(
        &self,
        sobject: &str,
        records: &[Record],
        options: Option<IngestOptions>,
    ) -> Result<IngestResult> {
        let options = options.unwrap_or_default();
        self.aggregate(BulkOperation::Update, sobject, records, &options).await
    }

    /// Create or update records matched on `external_id_field`.
    pub async fn upsert(
        &self,
        sobject: &str,
        records: &[Record],
        external_id_field: &str,
        options: Option<IngestOptions>,
    ) -> Result<IngestResult> {
        let mut options = options.unwrap_or_default();
        options.external_id_field = Some(external_id_field.to_string());
        self.aggregate(BulkOperation::Upsert, sobject, records, &options).await
    }

    /// Delete records by `Id`. `hard` skips the recycle bin.
    pub async fn delete(
        &self,
        sobject: &str,
        records: &[Record],
        hard: bool,
        options: Option<IngestOptions>,
    ) -> Result<IngestResult> {
        let mut options = options.unwrap_or_default();
        options.assignment_rule_id = None;
        let operation = if hard {
            BulkOperation::HardDelete
        } else {
            BulkOperation::Delete
        };
        self.aggregate(operation, sobject, records, &options).await
    }
}
