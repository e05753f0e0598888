//! # relay-sf-rest
//!
//! Salesforce REST API operations on top of `relay-sf-client`.
//!
//! ## Features
//!
//! - **SObject CRUD** - Create, Read, Update, Delete and Upsert individual records
//! - **SOQL Query** - Execute queries with automatic pagination
//! - **Composite API** - Up to 25 dependent subrequests in one call, linked
//!   with `@{referenceId.field}` references
//! - **Composite Batch** - Up to 25 independent subrequests in one call
//! - **Limits** - Check API usage and limits
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_sf_rest::SalesforceRestClient;
//! use serde_json::json;
//!
//! let rest = SalesforceRestClient::from_client(client);
//!
//! let mut composite = rest.composite().with_all_or_none(true);
//! let account = composite.sobject().create("Account", &json!({"Name": "Acme"}))?;
//! let contact = composite.sobject().create(
//!     "Contact",
//!     &json!({"LastName": "Doe", "AccountId": account.reference().id()}),
//! )?;
//! composite.execute().await?;
//!
//! println!("account {} contact {}", account.id()?, contact.id()?);
//! ```

mod batch;
mod builder;
mod client;
mod composite;
mod error;
mod reference;
mod sobject;
mod subrequest;
mod validate;
pub mod wire;

pub use batch::{BinaryPart, CompositeBatch};
pub use builder::{SobjectSubrequests, MAX_SUBREQUESTS};
pub use client::SalesforceRestClient;
pub use composite::Composite;
pub use error::{Error, ErrorKind, Result};
pub use reference::Reference;
pub use sobject::{CreateResult, SalesforceError, UpsertResult};
pub use subrequest::{kind, Outcome, Subrequest};
