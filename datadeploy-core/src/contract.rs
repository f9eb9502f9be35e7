//! # contract: the remote platform connection capability
//!
//! This module defines the single trait ([`Connection`]) through which every
//! core component talks to the remote platform, plus the plain data types
//! exchanged over it.
//!
//! ## Interface & Extensibility
//! - Implement [`Connection`] to plug in a transport (the CLI crate ships an
//!   HTTP implementation; tests use the generated `MockConnection`).
//! - The connection is always passed explicitly, by shared reference, into
//!   the orchestrator, query builder and drivers. Nothing in the core holds
//!   it as ambient state.
//! - All methods are async and return [`ConnectionError`] on failure; the
//!   core maps these onto its own error taxonomy.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall` so integration tests can build
//!   deterministic connections without a live platform.

use std::fmt;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::query::Query;

/// One record as exchanged with the platform: an ordered JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Error type returned by connection implementations.
pub type ConnectionError = Box<dyn std::error::Error + Send + Sync>;

/// Bulk operation requested for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOperation {
    Insert,
    Upsert { external_id_field: String },
}

impl BulkOperation {
    /// Upsert when an external-id field is configured, insert otherwise.
    pub fn select(upsert_key_field: Option<&str>) -> Self {
        match upsert_key_field {
            Some(field) if !field.is_empty() => BulkOperation::Upsert {
                external_id_field: field.to_string(),
            },
            _ => BulkOperation::Insert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperation::Insert => "insert",
            BulkOperation::Upsert { .. } => "upsert",
        }
    }

    pub fn external_id_field(&self) -> Option<&str> {
        match self {
            BulkOperation::Insert => None,
            BulkOperation::Upsert { external_id_field } => Some(external_id_field),
        }
    }
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to open a new bulk job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBulkJob {
    pub entity_name: String,
    pub operation: BulkOperation,
}

/// Remote job handle as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobInfo {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Remote processing state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    Queued,
    InProgress,
    Completed,
    Failed,
    #[serde(rename = "Not Processed")]
    NotProcessed,
}

impl BatchState {
    /// True once the platform will not change the batch any further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Failed | BatchState::NotProcessed
        )
    }
}

/// Batch handle and status as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    pub id: String,
    pub job_id: String,
    pub state: BatchState,
    #[serde(default)]
    pub state_message: Option<String>,
}

/// Per-record result of a completed batch, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResult {
    pub success: bool,
    pub id: Option<String>,
    pub errors: Vec<String>,
}

impl RecordResult {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            errors: Vec::new(),
        }
    }

    pub fn failure<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: false,
            id: None,
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Locator for the next page; `None` once the result set is exhausted.
    pub next_records_locator: Option<String>,
}

/// Capability to run bulk jobs and queries against the remote platform.
///
/// Implementations are borrowed immutably for a whole run and shared by every
/// job in it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a bulk job for the given entity and operation.
    async fn create_job(&self, request: &NewBulkJob) -> Result<BulkJobInfo, ConnectionError>;

    /// Submit all records as one batch; resolves once the platform has queued it.
    async fn submit_batch(
        &self,
        job_id: &str,
        records: &[Record],
    ) -> Result<BatchInfo, ConnectionError>;

    /// Current status of a previously submitted batch.
    async fn batch_status(&self, job_id: &str, batch_id: &str)
        -> Result<BatchInfo, ConnectionError>;

    /// Per-record results of a completed batch, aligned with the submitted records.
    async fn batch_results(
        &self,
        job_id: &str,
        batch_id: &str,
    ) -> Result<Vec<RecordResult>, ConnectionError>;

    /// Close the job so it accepts no further batches.
    async fn close_job(&self, job_id: &str) -> Result<BulkJobInfo, ConnectionError>;

    /// Run a query and return its first page.
    async fn query(&self, query: &Query) -> Result<QueryPage, ConnectionError>;

    /// Fetch the page identified by a locator from a previous page.
    async fn query_more(&self, locator: &str) -> Result<QueryPage, ConnectionError>;
}
