use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::DataDeployError;

/// Name of the job configuration file expected in the base directory.
pub const DEPLOYMENT_FILE_NAME: &str = "datadeploy.json";

/// Default time to wait for a bulk batch before giving up.
pub const DEFAULT_MAX_WAIT_MINUTES: u64 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl DeploymentConfig {
    pub fn trace_loaded(&self) {
        info!(jobs_count = self.jobs.len(), "Loaded DeploymentConfig");
        for job in &self.jobs {
            job.trace_loaded();
        }
        debug!(?self, "DeploymentConfig loaded (full debug)");
    }
}

/// One entry of the `jobs` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    #[serde(alias = "sObjectApiName")]
    pub entity_name: String,
    pub data_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_config: Option<JobDeployConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieve_config: Option<JobRetrieveConfig>,
}

impl JobConfig {
    pub fn trace_loaded(&self) {
        info!(
            entity = %self.entity_name,
            data_file = %self.data_file_name,
            upsert_key = self.upsert_key_field().unwrap_or("-"),
            "Loaded job"
        );
    }

    pub fn upsert_key_field(&self) -> Option<&str> {
        self.deploy_config
            .as_ref()
            .and_then(|c| c.upsert_key_field.as_deref())
    }

    pub fn max_wait(&self) -> Duration {
        let minutes = self
            .deploy_config
            .as_ref()
            .and_then(|c| c.max_wait_minutes)
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_MAX_WAIT_MINUTES);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    pub fn deploy_fail_on_error(&self) -> bool {
        self.deploy_config
            .as_ref()
            .and_then(|c| c.fail_on_error)
            .unwrap_or(true)
    }

    pub fn retrieve_fail_on_error(&self) -> bool {
        self.retrieve_config
            .as_ref()
            .and_then(|c| c.fail_on_error)
            .unwrap_or(true)
    }

    pub fn exclude_system_fields(&self) -> bool {
        self.retrieve_config
            .as_ref()
            .and_then(|c| c.exclude_system_fields)
            .unwrap_or(true)
    }

    pub fn excluded_fields(&self) -> &[String] {
        self.retrieve_config
            .as_ref()
            .and_then(|c| c.exclude_fields.as_deref())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDeployConfig {
    #[serde(default, alias = "externalIdFieldApiName")]
    pub upsert_key_field: Option<String>,
    #[serde(default)]
    pub max_wait_minutes: Option<u64>,
    #[serde(default)]
    pub fail_on_error: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRetrieveConfig {
    #[serde(default, alias = "includeFieldApiNames", alias = "fieldApiNames")]
    pub include_fields: Option<Vec<String>>,
    #[serde(default, alias = "excludeFieldApiNames")]
    pub exclude_fields: Option<Vec<String>>,
    #[serde(default)]
    pub filter_criteria: Option<serde_json::Value>,
    #[serde(default, alias = "sortFieldApiNames", alias = "sortFieldNames")]
    pub sort_fields: Option<Vec<String>>,
    #[serde(default)]
    pub max_record_count: Option<u64>,
    #[serde(default)]
    pub exclude_system_fields: Option<bool>,
    #[serde(default)]
    pub fail_on_error: Option<bool>,
}

/// Reads `datadeploy.json` from the given base directory.
pub fn load_deployment_config(base_directory: &Path) -> Result<DeploymentConfig, DataDeployError> {
    let path = base_directory.join(DEPLOYMENT_FILE_NAME);
    load_deployment_config_file(&path)
}

/// Reads a job configuration from an explicit file path.
pub fn load_deployment_config_file(path: &Path) -> Result<DeploymentConfig, DataDeployError> {
    info!(deployment_file = %path.display(), "Loading deployment file");

    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, deployment_file = %path.display(), "Failed to read deployment file");
        not_readable(path, e.to_string())
    })?;

    let config: DeploymentConfig = serde_json::from_str(&content).map_err(|e| {
        error!(error = ?e, deployment_file = %path.display(), "Failed to parse deployment file");
        not_readable(path, format!("invalid JSON: {e}"))
    })?;

    config.trace_loaded();
    Ok(config)
}

fn not_readable(path: &Path, reason: String) -> DataDeployError {
    DataDeployError::ConfigNotReadable {
        path: PathBuf::from(path),
        reason,
    }
}
