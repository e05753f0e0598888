//! # relay-sf-bulk
//!
//! Salesforce Bulk API 2.0 ingest jobs on top of the relay-sf-client executor.
//!
//! ## Features
//!
//! - **Ingest Jobs** - Insert, Update, Upsert, Delete, Hard Delete
//! - **Job Management** - Create, upload, poll, abort, delete and list jobs
//! - **CSV Chunking** - Records are split into uploads by size and record count
//! - **Batch Accounting** - Each upload publishes a `BulkApiBatchConsumption` event
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_sf_bulk::{BulkApiClient, IngestOptions};
//!
//! let bulk = BulkApiClient::from_client(client);
//! let result = bulk
//!     .upsert("Account", &records, "External_Id__c", Some(IngestOptions::default()))
//!     .await?;
//!
//! for failure in &result.failed_results {
//!     eprintln!("{}", failure["sf__Error"]);
//! }
//! ```

mod client;
mod error;
mod ingest_csv;
mod types;

pub use client::{BulkApiClient, IngestOptions};
pub use error::{Error, ErrorKind, Result};
pub use ingest_csv::{
    deserialize_ingest_results, estimate_batches, serialize_ingest_data, DEFAULT_MAX_RECORDS,
    DEFAULT_MAX_SIZE_BYTES, RECORDS_PER_BATCH,
};
pub use types::*;
