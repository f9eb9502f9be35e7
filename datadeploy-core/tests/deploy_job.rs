use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use datadeploy_core::config::{JobConfig, JobDeployConfig};
use datadeploy_core::contract::{
    BatchInfo, BatchState, BulkJobInfo, BulkOperation, MockConnection, Record, RecordResult,
};
use datadeploy_core::error::DataDeployError;
use datadeploy_core::job::{
    run_deploy_job_with, BulkJob, BulkJobState, PollSettings, RecordOutcome,
};
use serde_json::{json, Value};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("record must be a JSON object")
}

fn job(entity: &str, upsert_key: Option<&str>) -> JobConfig {
    JobConfig {
        entity_name: entity.to_string(),
        data_file_name: format!("{entity}.json"),
        deploy_config: Some(JobDeployConfig {
            upsert_key_field: upsert_key.map(str::to_string),
            max_wait_minutes: Some(1),
            fail_on_error: None,
        }),
        retrieve_config: None,
    }
}

fn batch(state: BatchState) -> BatchInfo {
    BatchInfo {
        id: "751".into(),
        job_id: "750".into(),
        state,
        state_message: None,
    }
}

fn fast_poll() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(5),
        timeout: Duration::from_millis(200),
    }
}

/// A connection whose job is accepted and whose batch completes on the first poll.
fn completing_connection(results: Vec<RecordResult>) -> MockConnection {
    let mut connection = MockConnection::new();
    connection.expect_create_job().times(1).returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: Some("Open".into()),
        })
    });
    connection
        .expect_submit_batch()
        .times(1)
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection
        .expect_batch_status()
        .returning(|_, _| Ok(batch(BatchState::Completed)));
    connection
        .expect_batch_results()
        .times(1)
        .return_once(move |_, _| Ok(results));
    connection.expect_close_job().times(1).returning(|id| {
        Ok(BulkJobInfo {
            id: id.to_string(),
            state: Some("Closed".into()),
        })
    });
    connection
}

#[tokio::test]
async fn test_insert_results_are_partitioned_by_position() {
    let records = vec![
        record(json!({"Name": "Acme"})),
        record(json!({"Name": ""})),
        record(json!({"Name": "Globex"})),
    ];
    let connection = completing_connection(vec![
        RecordResult::success("001A"),
        RecordResult::failure(["REQUIRED_FIELD_MISSING: Name"]),
        RecordResult::success("001C"),
    ]);

    let outcome = run_deploy_job_with(&connection, &job("Account", None), &records, fast_poll())
        .await
        .expect("deploy job should complete");

    assert_eq!(outcome.operation, BulkOperation::Insert);
    assert_eq!(outcome.len(), records.len());
    assert_eq!(
        outcome.success_count() + outcome.failure_count(),
        records.len(),
        "every input record must have exactly one outcome"
    );
    for (entry, input) in outcome.entries.iter().zip(&records) {
        assert_eq!(&entry.record, input, "outcome[i] must pair with input[i]");
    }
    assert_eq!(
        outcome.entries[0].outcome,
        RecordOutcome::Success {
            id: Some("001A".into())
        }
    );
    assert_eq!(
        outcome.entries[1].outcome,
        RecordOutcome::Error {
            messages: vec!["REQUIRED_FIELD_MISSING: Name".into()]
        }
    );
    let failed: Vec<_> = outcome.errors().map(|e| e.record.clone()).collect();
    assert_eq!(failed, vec![records[1].clone()]);
}

#[tokio::test]
async fn test_upsert_key_selects_upsert_operation() {
    let records = vec![record(json!({"Name": "Acme", "Ext__c": "A-1"}))];

    let mut connection = MockConnection::new();
    connection
        .expect_create_job()
        .withf(|request| {
            request.entity_name == "Account"
                && request.operation
                    == BulkOperation::Upsert {
                        external_id_field: "Ext__c".into(),
                    }
        })
        .times(1)
        .returning(|_| {
            Ok(BulkJobInfo {
                id: "750".into(),
                state: None,
            })
        });
    connection
        .expect_submit_batch()
        .withf(|job_id, submitted| job_id == "750" && submitted.len() == 1)
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection
        .expect_batch_status()
        .returning(|_, _| Ok(batch(BatchState::Completed)));
    connection
        .expect_batch_results()
        .returning(|_, _| Ok(vec![RecordResult::success("001A")]));
    connection.expect_close_job().returning(|id| {
        Ok(BulkJobInfo {
            id: id.to_string(),
            state: None,
        })
    });

    let outcome = run_deploy_job_with(
        &connection,
        &job("Account", Some("Ext__c")),
        &records,
        fast_poll(),
    )
    .await
    .expect("upsert job should complete");

    assert_eq!(
        outcome.operation,
        BulkOperation::Upsert {
            external_id_field: "Ext__c".into()
        }
    );
    assert_eq!(outcome.success_count(), 1);
}

#[tokio::test]
async fn test_rejected_job_creation_never_submits_a_batch() {
    let mut connection = MockConnection::new();
    connection
        .expect_create_job()
        .returning(|_| Err("INVALID_TYPE: sObject type 'Acount' is not supported".into()));
    connection.expect_submit_batch().never();
    connection.expect_close_job().never();

    let err = run_deploy_job_with(
        &connection,
        &job("Acount", None),
        &[record(json!({"Name": "Acme"}))],
        fast_poll(),
    )
    .await
    .unwrap_err();

    match err {
        DataDeployError::RemoteJob { entity, message } => {
            assert_eq!(entity, "Acount");
            assert!(message.contains("INVALID_TYPE"), "got: {message}");
        }
        other => panic!("expected RemoteJob, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_not_accepted_aborts_the_job() {
    let mut connection = MockConnection::new();
    connection.expect_create_job().returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: None,
        })
    });
    connection.expect_submit_batch().returning(|_, _| {
        Ok(BatchInfo {
            state_message: Some("InvalidBatch: records must be an array".into()),
            ..batch(BatchState::Failed)
        })
    });
    connection.expect_batch_status().never();
    connection.expect_close_job().times(1).returning(|id| {
        Ok(BulkJobInfo {
            id: id.to_string(),
            state: None,
        })
    });

    let err = run_deploy_job_with(
        &connection,
        &job("Account", None),
        &[record(json!({"Name": "Acme"}))],
        fast_poll(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(&err, DataDeployError::RemoteBatch { message, .. } if message.contains("InvalidBatch")),
        "expected RemoteBatch, got {err:?}"
    );
}

#[tokio::test]
async fn test_polling_continues_until_batch_completes() {
    let polls = Arc::new(AtomicUsize::new(0));
    let polls_seen = polls.clone();

    let mut connection = MockConnection::new();
    connection.expect_create_job().returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: None,
        })
    });
    connection
        .expect_submit_batch()
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection
        .expect_batch_status()
        .times(3)
        .returning(move |_, _| {
            let state = match polls.fetch_add(1, Ordering::SeqCst) {
                0 => BatchState::Queued,
                1 => BatchState::InProgress,
                _ => BatchState::Completed,
            };
            Ok(batch(state))
        });
    connection
        .expect_batch_results()
        .returning(|_, _| Ok(vec![RecordResult::success("001A")]));
    connection.expect_close_job().returning(|id| {
        Ok(BulkJobInfo {
            id: id.to_string(),
            state: None,
        })
    });

    let outcome = run_deploy_job_with(
        &connection,
        &job("Account", None),
        &[record(json!({"Name": "Acme"}))],
        fast_poll(),
    )
    .await
    .expect("job should complete after a few polls");

    assert_eq!(polls_seen.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.success_count(), 1);
}

#[tokio::test]
async fn test_poll_deadline_yields_timeout_error() {
    let mut connection = MockConnection::new();
    connection.expect_create_job().returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: None,
        })
    });
    connection
        .expect_submit_batch()
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection
        .expect_batch_status()
        .returning(|_, _| Ok(batch(BatchState::InProgress)));
    connection.expect_batch_results().never();
    connection.expect_close_job().times(1).returning(|id| {
        Ok(BulkJobInfo {
            id: id.to_string(),
            state: None,
        })
    });

    let settings = PollSettings {
        interval: Duration::from_millis(5),
        timeout: Duration::from_millis(40),
    };
    let err = run_deploy_job_with(
        &connection,
        &job("Account", None),
        &[record(json!({"Name": "Acme"}))],
        settings,
    )
    .await
    .unwrap_err();

    match err {
        DataDeployError::Timeout {
            entity,
            job_id,
            batch_id,
            waited,
        } => {
            assert_eq!(entity, "Account");
            assert_eq!(job_id, "750");
            assert_eq!(batch_id, "751");
            assert!(waited >= settings.timeout, "waited only {waited:?}");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_result_count_mismatch_is_a_batch_error() {
    let connection = completing_connection(vec![RecordResult::success("001A")]);

    let err = run_deploy_job_with(
        &connection,
        &job("Account", None),
        &[record(json!({"Name": "Acme"})), record(json!({"Name": "Globex"}))],
        fast_poll(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, DataDeployError::RemoteBatch { .. }),
        "expected RemoteBatch, got {err:?}"
    );
}

#[tokio::test]
async fn test_close_failure_does_not_change_the_outcome() {
    let mut connection = MockConnection::new();
    connection.expect_create_job().returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: None,
        })
    });
    connection
        .expect_submit_batch()
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection
        .expect_batch_status()
        .returning(|_, _| Ok(batch(BatchState::Completed)));
    connection
        .expect_batch_results()
        .returning(|_, _| Ok(vec![RecordResult::success("001A")]));
    connection
        .expect_close_job()
        .returning(|_| Err("session expired".into()));

    let outcome = run_deploy_job_with(
        &connection,
        &job("Account", None),
        &[record(json!({"Name": "Acme"}))],
        fast_poll(),
    )
    .await
    .expect("close failure must not fail the job");
    assert_eq!(outcome.success_count(), 1);
}

#[tokio::test]
async fn test_bulk_job_state_machine_transitions() {
    let mut connection = MockConnection::new();
    connection.expect_create_job().returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: None,
        })
    });
    connection
        .expect_submit_batch()
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection
        .expect_batch_status()
        .returning(|_, _| Ok(batch(BatchState::Completed)));
    connection
        .expect_batch_results()
        .returning(|_, _| Ok(vec![RecordResult::success("001A")]));

    let mut bulk_job = BulkJob::create(&connection, "Account", BulkOperation::Insert)
        .await
        .expect("job should be created");
    assert_eq!(bulk_job.state(), &BulkJobState::Created);

    let premature = bulk_job.poll(&connection, fast_poll()).await;
    assert!(premature.is_err(), "polling before submitting must fail");

    bulk_job
        .submit_batch(&connection, &[record(json!({"Name": "Acme"}))])
        .await
        .expect("batch should be accepted");
    assert_eq!(
        bulk_job.state(),
        &BulkJobState::BatchSubmitted {
            batch_id: "751".into()
        }
    );

    bulk_job
        .poll(&connection, fast_poll())
        .await
        .expect("batch should complete");
    assert_eq!(
        bulk_job.state(),
        &BulkJobState::Completed {
            batch_id: "751".into()
        }
    );
}

#[tokio::test]
async fn test_unrepresentable_timeout_polls_without_deadline() {
    let polls = Arc::new(AtomicUsize::new(0));

    let mut connection = MockConnection::new();
    connection.expect_create_job().returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: None,
        })
    });
    connection
        .expect_submit_batch()
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection.expect_batch_status().returning(move |_, _| {
        let state = if polls.fetch_add(1, Ordering::SeqCst) < 2 {
            BatchState::InProgress
        } else {
            BatchState::Completed
        };
        Ok(batch(state))
    });
    connection
        .expect_batch_results()
        .returning(|_, _| Ok(vec![RecordResult::success("001A")]));
    connection.expect_close_job().returning(|id| {
        Ok(BulkJobInfo {
            id: id.to_string(),
            state: None,
        })
    });

    let settings = PollSettings {
        interval: Duration::from_millis(5),
        timeout: Duration::MAX,
    };
    let outcome = run_deploy_job_with(
        &connection,
        &job("Account", None),
        &[record(json!({"Name": "Acme"}))],
        settings,
    )
    .await
    .expect("an unbounded deadline must not overflow");
    assert_eq!(outcome.success_count(), 1);
}

#[tokio::test]
async fn test_batch_not_processed_while_polling_fails_the_job() {
    let mut connection = MockConnection::new();
    connection.expect_create_job().returning(|_| {
        Ok(BulkJobInfo {
            id: "750".into(),
            state: None,
        })
    });
    connection
        .expect_submit_batch()
        .returning(|_, _| Ok(batch(BatchState::Queued)));
    connection
        .expect_batch_status()
        .times(1)
        .returning(|_, _| Ok(batch(BatchState::NotProcessed)));
    connection.expect_batch_results().never();
    connection.expect_close_job().times(1).returning(|id| {
        Ok(BulkJobInfo {
            id: id.to_string(),
            state: None,
        })
    });

    let err = run_deploy_job_with(
        &connection,
        &job("Account", None),
        &[record(json!({"Name": "Acme"}))],
        fast_poll(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(&err, DataDeployError::RemoteBatch { message, .. } if message.contains("NotProcessed")),
        "expected RemoteBatch, got {err:?}"
    );
}
