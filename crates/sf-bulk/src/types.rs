//! Types for Bulk API 2.0 ingest jobs.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// One record to ingest: field name to value. A nested object with exactly
/// one entry is a relationship lookup, e.g. `{"Account": {"External_Id__c": "A-1"}}`.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One row of a job result CSV, keyed by column header.
pub type ResultRow = HashMap<String, String>;

/// Deserialize API version that can be either a float (59.0) or string ("59.0").
pub(crate) fn deserialize_api_version<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ApiVersion {
        Float(f64),
        String(String),
    }

    Option::<ApiVersion>::deserialize(deserializer).map(|opt| {
        opt.map(|v| match v {
            ApiVersion::Float(f) => format!("{:.1}", f),
            ApiVersion::String(s) => s,
        })
    })
}

/// Bulk API 2.0 job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Job is open and accepting data
    Open,
    /// Upload is complete, job is queued for processing
    UploadComplete,
    /// Job is processing
    InProgress,
    /// Job was aborted
    Aborted,
    /// Job completed
    JobComplete,
    /// Job failed
    Failed,
}

impl JobState {
    /// Check if job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Aborted | JobState::JobComplete | JobState::Failed
        )
    }

    /// Check if job completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::JobComplete)
    }
}

/// Bulk API 2.0 ingest operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkOperation {
    /// Insert new records
    Insert,
    /// Update existing records
    Update,
    /// Upsert based on external ID
    Upsert,
    /// Delete records (soft delete)
    Delete,
    /// Hard delete records (permanent)
    HardDelete,
}

impl BulkOperation {
    /// Get the API string for this operation.
    pub fn api_name(&self) -> &'static str {
        match self {
            BulkOperation::Insert => "insert",
            BulkOperation::Update => "update",
            BulkOperation::Upsert => "upsert",
            BulkOperation::Delete => "delete",
            BulkOperation::HardDelete => "hardDelete",
        }
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// Request to create an ingest job.
///
/// Uploads are always comma-delimited CSV with LF line endings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIngestJobRequest {
    pub column_delimiter: String,
    pub content_type: String,
    pub line_ending: String,
    /// SObject API name
    pub object: String,
    pub operation: BulkOperation,
    /// Assignment rule to run for a Case or a Lead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_rule_id: Option<String>,
    /// External ID field for upsert
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
}

impl CreateIngestJobRequest {
    /// Create a new ingest job request.
    pub fn new(sobject: impl Into<String>, operation: BulkOperation) -> Self {
        Self {
            column_delimiter: "COMMA".to_string(),
            content_type: "CSV".to_string(),
            line_ending: "LF".to_string(),
            object: sobject.into(),
            operation,
            assignment_rule_id: None,
            external_id_field_name: None,
        }
    }

    /// Set the external ID field for upsert operations.
    pub fn with_external_id_field(mut self, field: impl Into<String>) -> Self {
        self.external_id_field_name = Some(field.into());
        self
    }

    pub fn with_assignment_rule_id(mut self, id: impl Into<String>) -> Self {
        self.assignment_rule_id = Some(id.into());
        self
    }
}

/// Request to change a job's state.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateJobStateRequest {
    pub state: JobState,
}

impl UpdateJobStateRequest {
    /// Close the job for uploads and queue it.
    pub fn upload_complete() -> Self {
        Self {
            state: JobState::UploadComplete,
        }
    }

    pub fn abort() -> Self {
        Self {
            state: JobState::Aborted,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Ingest job information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    /// Job ID
    pub id: String,
    /// Current state
    pub state: JobState,
    /// SObject API name
    pub object: String,
    /// Operation type
    pub operation: String,
    #[serde(default)]
    pub external_id_field_name: Option<String>,
    #[serde(default)]
    pub created_by_id: Option<String>,
    /// Job creation time
    #[serde(default)]
    pub created_date: Option<String>,
    /// Last modification time
    #[serde(default)]
    pub system_modstamp: Option<String>,
    #[serde(default)]
    pub concurrency_mode: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// API version (can be float like 59.0 or string like "59.0")
    #[serde(default, deserialize_with = "deserialize_api_version")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    /// Upload URL, relative to the instance
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub line_ending: Option<String>,
    #[serde(default)]
    pub column_delimiter: Option<String>,
    /// Number of records processed
    #[serde(default)]
    pub number_records_processed: i64,
    /// Number of records failed
    #[serde(default)]
    pub number_records_failed: i64,
    /// Error message if failed
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One page of the ingest job listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJobList {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub next_records_url: Option<String>,
    pub records: Vec<IngestJob>,
}

// =============================================================================
// Result Types
// =============================================================================

/// Result of one completed ingest job.
#[derive(Debug, Clone)]
pub struct IngestJobResult {
    /// The job in its terminal state
    pub job: IngestJob,
    pub successful_results: Vec<ResultRow>,
    pub failed_results: Vec<ResultRow>,
    pub unprocessed_records: Vec<ResultRow>,
}

impl IngestJobResult {
    /// Check if the job succeeded.
    pub fn is_success(&self) -> bool {
        self.job.state.is_success()
    }
}

/// Aggregated result of an ingest operation split over one or more jobs.
#[derive(Debug, Clone, Default)]
pub struct IngestResult {
    /// Jobs in upload order
    pub jobs: Vec<IngestJob>,
    pub successful_results: Vec<ResultRow>,
    pub failed_results: Vec<ResultRow>,
    pub unprocessed_records: Vec<ResultRow>,
}

impl IngestResult {
    pub(crate) fn extend(&mut self, result: IngestJobResult) {
        self.jobs.push(result.job);
        self.successful_results.extend(result.successful_results);
        self.failed_results.extend(result.failed_results);
        self.unprocessed_records.extend(result.unprocessed_records);
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failed_results.is_empty() || !self.unprocessed_records.is_empty()
    }
}
