//! `load_config` module: connection settings for the remote platform.
//!
//! Job definitions live in `datadeploy.json` and are loaded by the core crate.
//! Everything secret (instance URL, access token) comes from the environment
//! instead, optionally through a `.env` file, and is read here.
//!
//! # Variables
//! - `DATADEPLOY_INSTANCE_URL`: base URL of the org, e.g. `https://acme.my.salesforce.com`
//! - `DATADEPLOY_ACCESS_TOKEN`: pre-issued session or OAuth access token
//! - `DATADEPLOY_API_VERSION`: optional, defaults to [`DEFAULT_API_VERSION`]
//!
//! # Errors
//! All errors use `anyhow::Error` and are surfaced at the CLI boundary.

use anyhow::Result;
use reqwest::Url;
use std::env;
use tracing::{debug, error, info};

pub const INSTANCE_URL_VAR: &str = "DATADEPLOY_INSTANCE_URL";
pub const ACCESS_TOKEN_VAR: &str = "DATADEPLOY_ACCESS_TOKEN";
pub const API_VERSION_VAR: &str = "DATADEPLOY_API_VERSION";

pub const DEFAULT_API_VERSION: &str = "58.0";

#[derive(Clone)]
pub struct ConnectionSettings {
    /// Instance base URL without a trailing slash.
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl ConnectionSettings {
    /// Reads connection settings from the environment.
    pub fn from_env() -> Result<Self> {
        let instance_url = match env::var(INSTANCE_URL_VAR) {
            Ok(value) if !value.trim().is_empty() => value.trim().trim_end_matches('/').to_string(),
            Ok(_) | Err(_) => {
                error!(var = INSTANCE_URL_VAR, "Instance URL missing in environment");
                return Err(anyhow::anyhow!("{INSTANCE_URL_VAR} must be set"));
            }
        };

        if let Err(e) = Url::parse(&instance_url) {
            error!(error = ?e, instance_url = %instance_url, "Instance URL is not a valid URL");
            return Err(anyhow::anyhow!(
                "{INSTANCE_URL_VAR} is not a valid URL ({instance_url}): {e}"
            ));
        }

        let access_token = match env::var(ACCESS_TOKEN_VAR) {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            Ok(_) | Err(_) => {
                error!(var = ACCESS_TOKEN_VAR, "Access token missing in environment");
                return Err(anyhow::anyhow!("{ACCESS_TOKEN_VAR} must be set"));
            }
        };

        let api_version = env::var(API_VERSION_VAR)
            .ok()
            .map(|v| v.trim().trim_start_matches('v').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let settings = Self {
            instance_url,
            access_token,
            api_version,
        };
        settings.trace_loaded();
        Ok(settings)
    }

    pub fn trace_loaded(&self) {
        info!(
            instance_url = %self.instance_url,
            api_version = %self.api_version,
            access_token_set = !self.access_token.is_empty(),
            "Loaded ConnectionSettings"
        );
        debug!(?self, "ConnectionSettings loaded (full debug)");
    }
}
