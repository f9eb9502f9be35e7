//! Bulk job orchestration: one job, one batch, one poll loop.
//!
//! A [`BulkJob`] is an explicit state machine over the remote job's lifecycle:
//!
//! ```text
//! Created -> BatchSubmitted -> Polling -> Completed
//!                                      -> Failed
//!                                      -> TimedOut
//! ```
//!
//! [`run_deploy_job`] drives a job through it for a single job descriptor and
//! returns the positionally aligned [`BatchOutcome`].

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::JobConfig;
use crate::contract::{
    BatchState, BulkOperation, Connection, NewBulkJob, Record, RecordResult,
};
use crate::error::DataDeployError;

/// Fixed cadence between batch status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll cadence and deadline for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    /// Default cadence with the job's `maxWaitMinutes` deadline.
    pub fn for_job(job: &JobConfig) -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: job.max_wait(),
        }
    }
}

/// Lifecycle state of a remote bulk job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkJobState {
    Created,
    BatchSubmitted { batch_id: String },
    Polling { batch_id: String },
    Completed { batch_id: String },
    Failed { reason: String },
    TimedOut { batch_id: String },
}

/// How a poll loop ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(Vec<RecordResult>),
    TimedOut { waited: Duration },
}

/// Remote bulk job owned by the orchestrator for one job descriptor.
#[derive(Debug)]
pub struct BulkJob {
    entity_name: String,
    job_id: String,
    operation: BulkOperation,
    state: BulkJobState,
}

impl BulkJob {
    /// Opens the remote job.
    pub async fn create<C>(
        connection: &C,
        entity_name: &str,
        operation: BulkOperation,
    ) -> Result<Self, DataDeployError>
    where
        C: Connection + ?Sized,
    {
        let request = NewBulkJob {
            entity_name: entity_name.to_string(),
            operation,
        };
        info!(
            entity = %entity_name,
            operation = %request.operation,
            external_id = request.operation.external_id_field().unwrap_or("-"),
            "[JOB] Creating bulk job"
        );
        let info = connection.create_job(&request).await.map_err(|e| {
            error!(entity = %entity_name, error = %e, "[JOB] Bulk job creation rejected");
            DataDeployError::RemoteJob {
                entity: entity_name.to_string(),
                message: e.to_string(),
            }
        })?;
        debug!(entity = %entity_name, job_id = %info.id, "[JOB] Bulk job created");

        Ok(Self {
            entity_name: request.entity_name,
            job_id: info.id,
            operation: request.operation,
            state: BulkJobState::Created,
        })
    }

    pub fn id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &BulkOperation {
        &self.operation
    }

    pub fn state(&self) -> &BulkJobState {
        &self.state
    }

    /// Submits every record as one batch and waits for the platform to queue it.
    pub async fn submit_batch<C>(
        &mut self,
        connection: &C,
        records: &[Record],
    ) -> Result<(), DataDeployError>
    where
        C: Connection + ?Sized,
    {
        if self.state != BulkJobState::Created {
            return Err(self.batch_error(format!(
                "cannot submit a batch in state {:?}",
                self.state
            )));
        }

        info!(entity = %self.entity_name, job_id = %self.job_id, records = records.len(), "[JOB] Submitting batch");
        let submitted = connection.submit_batch(&self.job_id, records).await;
        let batch = match submitted {
            Ok(batch) => batch,
            Err(e) => return Err(self.fail(e.to_string())),
        };

        match batch.state {
            state if state.is_terminal() && state != BatchState::Completed => {
                let reason = batch
                    .state_message
                    .unwrap_or_else(|| format!("batch {} was not accepted", batch.id));
                Err(self.fail(reason))
            }
            state => {
                debug!(entity = %self.entity_name, batch_id = %batch.id, ?state, "[JOB] Batch accepted");
                self.state = BulkJobState::BatchSubmitted { batch_id: batch.id };
                Ok(())
            }
        }
    }

    /// Polls the submitted batch until it completes, fails, or the deadline elapses.
    pub async fn poll<C>(
        &mut self,
        connection: &C,
        settings: PollSettings,
    ) -> Result<PollOutcome, DataDeployError>
    where
        C: Connection + ?Sized,
    {
        let batch_id = match &self.state {
            BulkJobState::BatchSubmitted { batch_id } => batch_id.clone(),
            other => {
                return Err(self.batch_error(format!("cannot poll a batch in state {other:?}")))
            }
        };
        self.state = BulkJobState::Polling {
            batch_id: batch_id.clone(),
        };

        let started = Instant::now();
        // None when the timeout is too large to represent: poll without a deadline.
        let deadline = started.checked_add(settings.timeout);
        loop {
            let polled = connection.batch_status(&self.job_id, &batch_id).await;
            let status = match polled {
                Ok(status) => status,
                Err(e) => return Err(self.fail(e.to_string())),
            };
            debug!(entity = %self.entity_name, batch_id = %batch_id, state = ?status.state, "[JOB] Polled batch");

            match status.state {
                BatchState::Completed => {
                    let fetched = connection.batch_results(&self.job_id, &batch_id).await;
                    let results = match fetched {
                        Ok(results) => results,
                        Err(e) => return Err(self.fail(e.to_string())),
                    };
                    self.state = BulkJobState::Completed { batch_id };
                    return Ok(PollOutcome::Completed(results));
                }
                state if state.is_terminal() => {
                    let reason = status
                        .state_message
                        .unwrap_or_else(|| format!("batch ended in state {state:?}"));
                    return Err(self.fail(reason));
                }
                _ => {}
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(entity = %self.entity_name, batch_id = %batch_id, "[JOB] Poll deadline elapsed");
                self.state = BulkJobState::TimedOut { batch_id };
                return Ok(PollOutcome::TimedOut {
                    waited: started.elapsed(),
                });
            }
            sleep(settings.interval).await;
        }
    }

    /// Closes the remote job. Failures are logged and otherwise ignored.
    pub async fn close<C>(&self, connection: &C)
    where
        C: Connection + ?Sized,
    {
        match connection.close_job(&self.job_id).await {
            Ok(_) => debug!(entity = %self.entity_name, job_id = %self.job_id, "[JOB] Bulk job closed"),
            Err(e) => warn!(entity = %self.entity_name, job_id = %self.job_id, error = %e, "[JOB] Failed to close bulk job"),
        }
    }

    fn fail(&mut self, reason: String) -> DataDeployError {
        error!(entity = %self.entity_name, job_id = %self.job_id, reason = %reason, "[JOB] Batch failed");
        self.state = BulkJobState::Failed {
            reason: reason.clone(),
        };
        self.batch_error(reason)
    }

    fn batch_error(&self, message: String) -> DataDeployError {
        DataDeployError::RemoteBatch {
            entity: self.entity_name.clone(),
            message,
        }
    }
}

/// Outcome of one record, aligned with the input record at the same index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Success { id: Option<String> },
    Error { messages: Vec<String> },
}

impl From<RecordResult> for RecordOutcome {
    fn from(result: RecordResult) -> Self {
        if result.success {
            RecordOutcome::Success { id: result.id }
        } else {
            let messages = if result.errors.is_empty() {
                vec!["record failed without an error message".to_string()]
            } else {
                result.errors
            };
            RecordOutcome::Error { messages }
        }
    }
}

/// One input record paired with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub record: Record,
    pub outcome: RecordOutcome,
}

/// Per-record results of one batch, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub operation: BulkOperation,
    pub entries: Vec<BatchEntry>,
}

impl BatchOutcome {
    /// Pairs results with the submitted records by index.
    pub fn partition(
        entity_name: &str,
        operation: BulkOperation,
        records: &[Record],
        results: Vec<RecordResult>,
    ) -> Result<Self, DataDeployError> {
        if results.len() != records.len() {
            return Err(DataDeployError::RemoteBatch {
                entity: entity_name.to_string(),
                message: format!(
                    "expected {} record results, got {}",
                    records.len(),
                    results.len()
                ),
            });
        }
        let entries = records
            .iter()
            .cloned()
            .zip(results)
            .map(|(record, result)| BatchEntry {
                record,
                outcome: result.into(),
            })
            .collect();
        Ok(Self { operation, entries })
    }

    pub fn successes(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, RecordOutcome::Success { .. }))
    }

    pub fn errors(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, RecordOutcome::Error { .. }))
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.errors().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs one deploy job end to end with the default poll cadence.
pub async fn run_deploy_job<C>(
    connection: &C,
    job: &JobConfig,
    records: &[Record],
) -> Result<BatchOutcome, DataDeployError>
where
    C: Connection + ?Sized,
{
    run_deploy_job_with(connection, job, records, PollSettings::for_job(job)).await
}

/// Runs one deploy job end to end with explicit poll settings.
pub async fn run_deploy_job_with<C>(
    connection: &C,
    job: &JobConfig,
    records: &[Record],
    settings: PollSettings,
) -> Result<BatchOutcome, DataDeployError>
where
    C: Connection + ?Sized,
{
    let operation = BulkOperation::select(job.upsert_key_field());
    let mut bulk_job = BulkJob::create(connection, &job.entity_name, operation).await?;

    let polled = match bulk_job.submit_batch(connection, records).await {
        Ok(()) => bulk_job.poll(connection, settings).await,
        Err(e) => Err(e),
    };
    bulk_job.close(connection).await;

    match polled? {
        PollOutcome::Completed(results) => {
            let outcome = BatchOutcome::partition(
                &job.entity_name,
                bulk_job.operation().clone(),
                records,
                results,
            )?;
            info!(
                entity = %job.entity_name,
                succeeded = outcome.success_count(),
                failed = outcome.failure_count(),
                "[JOB] Batch completed"
            );
            Ok(outcome)
        }
        PollOutcome::TimedOut { waited } => {
            let batch_id = match bulk_job.state() {
                BulkJobState::TimedOut { batch_id } => batch_id.clone(),
                _ => String::new(),
            };
            Err(DataDeployError::Timeout {
                entity: job.entity_name.clone(),
                job_id: bulk_job.id().to_string(),
                batch_id,
                waited,
            })
        }
    }
}
