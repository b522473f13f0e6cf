//! Record store: the table of scheduled email jobs.

pub mod airtable;
pub mod model;

use async_trait::async_trait;

use crate::error::RemoteError;

pub use airtable::AirtableStore;
pub use model::{EmailJob, EmailStatus, JobFilter, JobUpdate, WarningTag};

/// Backend-agnostic access to email job records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All jobs matching `filter`, following the store's pagination to the end.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<EmailJob>, RemoteError>;

    /// Apply `update` to the record with id `record_id`.
    async fn update(&self, record_id: &str, update: &JobUpdate) -> Result<(), RemoteError>;
}
