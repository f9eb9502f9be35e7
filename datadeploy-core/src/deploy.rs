//! Deployment driver: pushes every configured data file through a bulk job.
//!
//! Jobs run strictly one after another, in the order they are declared. Each
//! job is either skipped (filtered out or no records), deployed, or failed.
//! A failure stops the run unless the job sets `failOnError: false`, in which
//! case it is recorded and the next job starts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::{DeploymentConfig, JobConfig};
use crate::contract::{BulkOperation, Connection, Record};
use crate::error::{DataDeployError, RunFailure};
use crate::job::{run_deploy_job, RecordOutcome};
use crate::report::{JobOperation, JobResultSummary, JobStatus, RunResult};
use crate::run::{record_failure, RunOptions};

/// Deploys every job in `config` from files under the run's base directory.
pub async fn deploy<C>(
    connection: &C,
    config: &DeploymentConfig,
    options: &RunOptions,
) -> Result<RunResult, RunFailure>
where
    C: Connection + ?Sized,
{
    let base = options.base_directory.as_path();
    info!(deployment_directory = %base.display(), jobs = config.jobs.len(), "[DEPLOY] Starting deployment");

    let mut result = RunResult::new(options.base_directory.clone());

    for job in &config.jobs {
        let operation = JobOperation::from(&BulkOperation::select(job.upsert_key_field()));

        if options.filter.is_skipped(base, &job.data_file_name) {
            info!(entity = %job.entity_name, data_file = %job.data_file_name, "[DEPLOY] Skipping filtered data file");
            result.job_results.push(JobResultSummary::skipped(
                &job.entity_name,
                operation,
                &job.data_file_name,
                "excluded by file filter",
            ));
            continue;
        }

        let data_file = base.join(&job.data_file_name);
        let records = match read_records(job, &data_file) {
            Ok(records) => records,
            Err(error) => {
                let summary = failed_summary(job, operation, 0, &error);
                if let Some(error) =
                    record_failure(&mut result, summary, error, job.deploy_fail_on_error())
                {
                    return Err(RunFailure { result, error });
                }
                continue;
            }
        };

        if records.is_empty() {
            info!(entity = %job.entity_name, data_file = %data_file.display(), "[DEPLOY] No records, skipping");
            result.job_results.push(JobResultSummary::skipped(
                &job.entity_name,
                operation,
                &job.data_file_name,
                "no records in data file",
            ));
            continue;
        }

        info!(
            entity = %job.entity_name,
            records = records.len(),
            data_file = %data_file.display(),
            max_wait_secs = job.max_wait().as_secs(),
            "[DEPLOY] Deploying records"
        );

        let outcome = match run_deploy_job(connection, job, &records).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let summary = failed_summary(job, operation, records.len(), &error);
                if let Some(error) =
                    record_failure(&mut result, summary, error, job.deploy_fail_on_error())
                {
                    return Err(RunFailure { result, error });
                }
                continue;
            }
        };

        for (index, entry) in outcome.entries.iter().enumerate() {
            if let RecordOutcome::Error { messages } = &entry.outcome {
                error!(
                    entity = %job.entity_name,
                    record_index = index,
                    errors = %messages.join(", "),
                    "[DEPLOY] Record failed"
                );
            }
        }

        let succeeded = outcome.success_count();
        let failed = outcome.failure_count();
        let mut summary = JobResultSummary {
            entity_name: job.entity_name.clone(),
            operation: JobOperation::from(&outcome.operation),
            data_file_name: job.data_file_name.clone(),
            status: JobStatus::Succeeded,
            succeeded_count: succeeded,
            failed_count: failed,
            message: None,
        };

        if failed > 0 {
            let error = DataDeployError::PartialRecordFailure {
                entity: job.entity_name.clone(),
                failed,
                total: outcome.len(),
            };
            summary.status = JobStatus::Failed;
            summary.message = Some(error.to_string());
            if let Some(error) =
                record_failure(&mut result, summary, error, job.deploy_fail_on_error())
            {
                return Err(RunFailure { result, error });
            }
            continue;
        }

        info!(entity = %job.entity_name, records = succeeded, "[DEPLOY] Deployed records");
        result.job_results.push(summary);
    }

    info!(deployment_directory = %base.display(), "[DEPLOY] Deployment completed");
    Ok(result)
}

fn read_records(job: &JobConfig, path: &Path) -> Result<Vec<Record>, DataDeployError> {
    if !path.is_file() {
        error!(entity = %job.entity_name, data_file = %path.display(), "[DEPLOY] Data file not found");
        return Err(DataDeployError::DataFileNotFound {
            entity: job.entity_name.clone(),
            path: PathBuf::from(path),
        });
    }

    let not_readable = |reason: String| DataDeployError::DataFileNotReadable {
        entity: job.entity_name.clone(),
        path: PathBuf::from(path),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|e| not_readable(e.to_string()))?;
    serde_json::from_str::<Vec<Record>>(&content).map_err(|e| {
        error!(entity = %job.entity_name, error = ?e, "[DEPLOY] Data file is not a JSON array of records");
        not_readable(e.to_string())
    })
}

fn failed_summary(
    job: &JobConfig,
    operation: JobOperation,
    record_count: usize,
    error: &DataDeployError,
) -> JobResultSummary {
    JobResultSummary {
        entity_name: job.entity_name.clone(),
        operation,
        data_file_name: job.data_file_name.clone(),
        status: JobStatus::Failed,
        succeeded_count: 0,
        failed_count: record_count,
        message: Some(error.to_string()),
    }
}
