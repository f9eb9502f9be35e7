//! Per-job summaries and the run result returned by the drivers.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::contract::BulkOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOperation {
    Insert,
    Upsert,
    Retrieve,
}

impl JobOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOperation::Insert => "insert",
            JobOperation::Upsert => "upsert",
            JobOperation::Retrieve => "retrieve",
        }
    }
}

impl From<&BulkOperation> for JobOperation {
    fn from(operation: &BulkOperation) -> Self {
        match operation {
            BulkOperation::Insert => JobOperation::Insert,
            BulkOperation::Upsert { .. } => JobOperation::Upsert,
        }
    }
}

impl fmt::Display for JobOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultSummary {
    pub entity_name: String,
    pub operation: JobOperation,
    pub data_file_name: String,
    pub status: JobStatus,
    pub succeeded_count: usize,
    pub failed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobResultSummary {
    pub fn skipped(
        entity_name: &str,
        operation: JobOperation,
        data_file_name: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            operation,
            data_file_name: data_file_name.to_string(),
            status: JobStatus::Skipped,
            succeeded_count: 0,
            failed_count: 0,
            message: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub base_directory: PathBuf,
    pub job_results: Vec<JobResultSummary>,
}

impl RunResult {
    pub fn new(base_directory: PathBuf) -> Self {
        Self {
            base_directory,
            job_results: Vec::new(),
        }
    }

    /// True if any job ended in failure, whether or not the run continued past it.
    pub fn has_failures(&self) -> bool {
        self.job_results
            .iter()
            .any(|job| job.status == JobStatus::Failed)
    }

    pub fn total_succeeded(&self) -> usize {
        self.job_results.iter().map(|j| j.succeeded_count).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.job_results.iter().map(|j| j.failed_count).sum()
    }
}
