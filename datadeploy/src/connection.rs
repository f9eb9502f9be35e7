//! # HTTP connection
//!
//! [`HttpConnection`] implements the core [`Connection`] capability with
//! `reqwest` against the platform's asynchronous bulk API (jobs and batches)
//! and its REST query API.
//!
//! - Bulk calls authenticate with the `X-SFDC-Session` header, REST calls with
//!   a bearer token. Both use the same pre-issued access token.
//! - A query that selects every field is expanded through the entity's
//!   describe call before it is sent.
//! - Pagination uses the `nextRecordsUrl` returned with each page as the
//!   locator for the next one.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use datadeploy_core::contract::{
    BatchInfo, BulkJobInfo, Connection, ConnectionError, NewBulkJob, QueryPage, Record,
    RecordResult,
};
use datadeploy_core::query::{FieldSelection, Query};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::load_config::ConnectionSettings;

const SESSION_HEADER: &str = "X-SFDC-Session";

pub struct HttpConnection {
    client: Client,
    settings: ConnectionSettings,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobRequest<'a> {
    operation: &'a str,
    object: &'a str,
    content_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id_field_name: Option<&'a str>,
}

#[derive(Serialize)]
struct JobStateRequest {
    state: &'static str,
}

#[derive(Deserialize)]
struct BulkRecordResult {
    #[serde(default)]
    id: Option<String>,
    success: bool,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default = "default_done")]
    done: bool,
    #[serde(default)]
    next_records_url: Option<String>,
}

fn default_done() -> bool {
    true
}

#[derive(Deserialize)]
struct DescribeResponse {
    fields: Vec<DescribeField>,
}

#[derive(Deserialize)]
struct DescribeField {
    name: String,
}

impl HttpConnection {
    pub fn new(settings: ConnectionSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;
        info!(instance_url = %settings.instance_url, api_version = %settings.api_version, "Initialized HttpConnection");
        Ok(Self { client, settings })
    }

    fn bulk_url(&self, path: &str) -> String {
        format!(
            "{}/services/async/{}/{}",
            self.settings.instance_url, self.settings.api_version, path
        )
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            self.settings.instance_url, self.settings.api_version, path
        )
    }

    fn bulk(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(SESSION_HEADER, &self.settings.access_token)
    }

    fn rest(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.settings.access_token)
    }

    async fn describe_fields(&self, entity_name: &str) -> Result<Vec<String>, ConnectionError> {
        let url = self.data_url(&format!("sobjects/{entity_name}/describe"));
        let describe: DescribeResponse = send(self.rest(self.client.get(&url))).await?;
        debug!(entity = %entity_name, fields = describe.fields.len(), "Described entity");
        Ok(describe.fields.into_iter().map(|f| f.name).collect())
    }

    async fn fetch_page(&self, request: RequestBuilder) -> Result<QueryPage, ConnectionError> {
        let response: QueryResponse = send(self.rest(request)).await?;
        let next_records_locator = if response.done {
            None
        } else {
            response.next_records_url
        };
        Ok(QueryPage {
            records: response.records,
            next_records_locator,
        })
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn create_job(&self, request: &NewBulkJob) -> Result<BulkJobInfo, ConnectionError> {
        let body = JobRequest {
            operation: request.operation.as_str(),
            object: &request.entity_name,
            content_type: "JSON",
            external_id_field_name: request.operation.external_id_field(),
        };
        debug!(entity = %request.entity_name, operation = %request.operation, "POST bulk job");
        send(self.bulk(self.client.post(self.bulk_url("job"))).json(&body)).await
    }

    async fn submit_batch(
        &self,
        job_id: &str,
        records: &[Record],
    ) -> Result<BatchInfo, ConnectionError> {
        let url = self.bulk_url(&format!("job/{job_id}/batch"));
        debug!(job_id = %job_id, records = records.len(), "POST bulk batch");
        send(self.bulk(self.client.post(&url)).json(records)).await
    }

    async fn batch_status(
        &self,
        job_id: &str,
        batch_id: &str,
    ) -> Result<BatchInfo, ConnectionError> {
        let url = self.bulk_url(&format!("job/{job_id}/batch/{batch_id}"));
        send(self.bulk(self.client.get(&url))).await
    }

    async fn batch_results(
        &self,
        job_id: &str,
        batch_id: &str,
    ) -> Result<Vec<RecordResult>, ConnectionError> {
        let url = self.bulk_url(&format!("job/{job_id}/batch/{batch_id}/result"));
        let results: Vec<BulkRecordResult> = send(self.bulk(self.client.get(&url))).await?;
        Ok(results.into_iter().map(into_record_result).collect())
    }

    async fn close_job(&self, job_id: &str) -> Result<BulkJobInfo, ConnectionError> {
        let url = self.bulk_url(&format!("job/{job_id}"));
        let body = JobStateRequest { state: "Closed" };
        send(self.bulk(self.client.post(&url)).json(&body)).await
    }

    async fn query(&self, query: &Query) -> Result<QueryPage, ConnectionError> {
        let soql = match &query.fields {
            FieldSelection::All => {
                let fields = self.describe_fields(&query.entity_name).await?;
                query.render_with_fields(&fields)?
            }
            FieldSelection::Fields(_) => query.to_soql()?,
        };
        debug!(entity = %query.entity_name, soql = %soql, "GET query");
        let request = self.client.get(self.data_url("query")).query(&[("q", soql)]);
        self.fetch_page(request).await
    }

    async fn query_more(&self, locator: &str) -> Result<QueryPage, ConnectionError> {
        let url = format!("{}{}", self.settings.instance_url, locator);
        self.fetch_page(self.client.get(&url)).await
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ConnectionError> {
    let response = request.send().await?;
    let response = check_status(response).await?;
    Ok(response.json::<T>().await?)
}

async fn check_status(response: Response) -> Result<Response, ConnectionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = remote_error_message(&body).unwrap_or(body);
    error!(status = %status, url = %url, message = %message, "Remote call failed");
    Err(format!("{status}: {message}").into())
}

/// Pulls the human readable part out of a bulk (`exceptionCode`) or REST
/// (`[{errorCode, message}]`) error body.
fn remote_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let first = match &value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let code = first
        .get("exceptionCode")
        .or_else(|| first.get("errorCode"))
        .and_then(Value::as_str);
    let message = first
        .get("exceptionMessage")
        .or_else(|| first.get("message"))
        .and_then(Value::as_str)?;
    Some(match code {
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    })
}

fn into_record_result(result: BulkRecordResult) -> RecordResult {
    RecordResult {
        success: result.success,
        id: result.id,
        errors: result.errors.iter().map(error_text).collect(),
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(fields) => {
            let code = fields.get("statusCode").and_then(Value::as_str);
            let message = fields.get("message").and_then(Value::as_str);
            match (code, message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (None, Some(message)) => message.to_string(),
                _ => error.to_string(),
            }
        }
        other => other.to_string(),
    }
}
