//! Error taxonomy shared by the orchestrator, query builder and drivers.

use std::path::PathBuf;
use std::time::Duration;

use crate::report::RunResult;

#[derive(Debug, thiserror::Error)]
pub enum DataDeployError {
    #[error("Deployment file {path} is not readable: {reason}")]
    ConfigNotReadable { path: PathBuf, reason: String },

    #[error("Data file for {entity} not found: {path}")]
    DataFileNotFound { entity: String, path: PathBuf },

    #[error("Data file for {entity} is not readable ({path}): {reason}")]
    DataFileNotReadable {
        entity: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Data file for {entity} is not writable ({path}): {reason}")]
    DataFileNotWritable {
        entity: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Bulk job for {entity} was rejected: {message}")]
    RemoteJob { entity: String, message: String },

    #[error("Bulk batch for {entity} failed: {message}")]
    RemoteBatch { entity: String, message: String },

    #[error(
        "Polling timed out after {}s for {entity} (job {job_id}, batch {batch_id})",
        .waited.as_secs()
    )]
    Timeout {
        entity: String,
        job_id: String,
        batch_id: String,
        waited: Duration,
    },

    #[error("{failed} of {total} {entity} records failed to deploy")]
    PartialRecordFailure {
        entity: String,
        failed: usize,
        total: usize,
    },

    #[error("Query for {entity} failed: {message}")]
    Query { entity: String, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// A run that was aborted by a job failure.
///
/// `result` holds every job reached before the abort, including the failed one.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    pub result: RunResult,
    #[source]
    pub error: DataDeployError,
}
