//! Retrieval driver: queries every configured entity and writes normalized
//! records to the job's data file.

use std::fs;
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use tracing::{debug, error, info};

use crate::config::{DeploymentConfig, JobConfig};
use crate::contract::{Connection, Record};
use crate::error::{DataDeployError, RunFailure};
use crate::query::build_query;
use crate::report::{JobOperation, JobResultSummary, JobStatus, RunResult};
use crate::run::{record_failure, RunOptions};
use crate::transform::{transform_record, TransformOptions};

/// Retrieves every job in `config` into data files under the run's base directory.
pub async fn retrieve<C>(
    connection: &C,
    config: &DeploymentConfig,
    options: &RunOptions,
) -> Result<RunResult, RunFailure>
where
    C: Connection + ?Sized,
{
    let base = options.base_directory.as_path();
    info!(deployment_directory = %base.display(), jobs = config.jobs.len(), "[RETRIEVE] Starting retrieval");

    let mut result = RunResult::new(options.base_directory.clone());

    for job in &config.jobs {
        if options.filter.is_skipped(base, &job.data_file_name) {
            info!(entity = %job.entity_name, data_file = %job.data_file_name, "[RETRIEVE] Skipping filtered data file");
            result.job_results.push(JobResultSummary::skipped(
                &job.entity_name,
                JobOperation::Retrieve,
                &job.data_file_name,
                "excluded by file filter",
            ));
            continue;
        }

        let data_file = base.join(&job.data_file_name);
        info!(entity = %job.entity_name, data_file = %data_file.display(), "[RETRIEVE] Retrieving records to file");

        match retrieve_job(connection, job, &data_file).await {
            Ok(count) => {
                info!(entity = %job.entity_name, records = count, "[RETRIEVE] Retrieved records");
                result.job_results.push(JobResultSummary {
                    entity_name: job.entity_name.clone(),
                    operation: JobOperation::Retrieve,
                    data_file_name: job.data_file_name.clone(),
                    status: JobStatus::Succeeded,
                    succeeded_count: count,
                    failed_count: 0,
                    message: None,
                });
            }
            Err(error) => {
                let summary = JobResultSummary {
                    entity_name: job.entity_name.clone(),
                    operation: JobOperation::Retrieve,
                    data_file_name: job.data_file_name.clone(),
                    status: JobStatus::Failed,
                    succeeded_count: 0,
                    failed_count: 0,
                    message: Some(error.to_string()),
                };
                if let Some(error) =
                    record_failure(&mut result, summary, error, job.retrieve_fail_on_error())
                {
                    return Err(RunFailure { result, error });
                }
            }
        }
    }

    info!(deployment_directory = %base.display(), "[RETRIEVE] Retrieval completed");
    Ok(result)
}

/// Queries, transforms and writes one job's records; returns how many were written.
pub async fn retrieve_job<C>(
    connection: &C,
    job: &JobConfig,
    data_file: &Path,
) -> Result<usize, DataDeployError>
where
    C: Connection + ?Sized,
{
    let query = build_query(connection, job);
    let soql = query.query().to_soql()?;
    debug!(entity = %job.entity_name, soql = %soql, "[RETRIEVE] Query");

    let options = TransformOptions::for_job(job);
    let mut raw_records = query.records();
    let mut records: Vec<Record> = Vec::new();
    while let Some(raw) = raw_records.try_next().await? {
        records.push(transform_record(raw, &options));
    }

    write_records(job, data_file, &records)?;
    Ok(records.len())
}

fn write_records(job: &JobConfig, path: &Path, records: &[Record]) -> Result<(), DataDeployError> {
    let not_writable = |reason: String| {
        error!(entity = %job.entity_name, data_file = %path.display(), reason = %reason, "[RETRIEVE] Failed to write data file");
        DataDeployError::DataFileNotWritable {
            entity: job.entity_name.clone(),
            path: PathBuf::from(path),
            reason,
        }
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| not_writable(e.to_string()))?;
    }
    let mut json = serde_json::to_string_pretty(records).map_err(|e| not_writable(e.to_string()))?;
    json.push('\n');
    fs::write(path, json).map_err(|e| not_writable(e.to_string()))
}
