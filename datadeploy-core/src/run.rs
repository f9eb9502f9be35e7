//! Settings and failure policy shared by the deploy and retrieve drivers.

use std::path::PathBuf;

use tracing::{error, warn};

use crate::error::DataDeployError;
use crate::paths::PathFilter;
use crate::report::{JobResultSummary, RunResult};

/// Where a run reads and writes data files, and which of them it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub base_directory: PathBuf,
    pub filter: PathFilter,
}

impl RunOptions {
    pub fn new(base_directory: PathBuf) -> Self {
        Self {
            base_directory,
            filter: PathFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Records a failed job and decides whether the run stops.
///
/// Returns the error back when the job's `failOnError` policy aborts the run.
pub(crate) fn record_failure(
    result: &mut RunResult,
    summary: JobResultSummary,
    error: DataDeployError,
    fail_on_error: bool,
) -> Option<DataDeployError> {
    let entity = summary.entity_name.clone();
    result.job_results.push(summary);
    if fail_on_error {
        error!(entity = %entity, error = %error, "[RUN] Job failed, aborting run");
        Some(error)
    } else {
        warn!(entity = %entity, error = %error, "[RUN] Job failed, continuing (failOnError=false)");
        None
    }
}
