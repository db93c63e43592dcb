use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::gateway::http::{DEFAULT_LABEL_URL, DEFAULT_SITE_URL, DEFAULT_SYNTHETICS_URL};
use crate::gateway::HttpGatewayConfig;
use crate::models::AgentClass;

/// Prefix of every environment variable the tool reads, e.g. `KENTIK_EMAIL`.
pub const ENV_PREFIX: &str = "KENTIK_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub synthetics_url: String,
    pub label_url: String,
    pub site_url: String,
    pub management_tag: String,
    pub agent_class: AgentClass,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub min_request_interval_ms: u64,
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
pub struct PartialAppConfig {
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub synthetics_url: Option<String>,
    pub label_url: Option<String>,
    pub site_url: Option<String>,
    pub management_tag: Option<String>,
    pub agent_class: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub min_request_interval_ms: Option<u64>,
    pub log_dir: Option<String>,
}

fn default_management_tag() -> String {
    "csv-managed".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AppConfig {
    /// Loads the optional TOML file, then `.env` and `KENTIK_*` variables.
    /// Environment overrides file.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let contents = fs::read_to_string(path_str).map_err(|source| ConfigError::Read {
                    path: path_str.to_string(),
                    source,
                })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path_str.to_string(),
                    source,
                })?
            }
            _ => PartialAppConfig::default(),
        };

        let env_config: PartialAppConfig = envy::prefixed(ENV_PREFIX).from_env()?;

        Self::merge(env_config, file_config)
    }

    /// Merges two layers, `top` winning wherever it sets a value.
    pub fn merge(top: PartialAppConfig, base: PartialAppConfig) -> Result<Self, ConfigError> {
        let agent_class = match top.agent_class.or(base.agent_class) {
            Some(raw) => raw.parse().map_err(|message| ConfigError::Invalid {
                key: "agent_class",
                message,
            })?,
            None => AgentClass::default(),
        };

        let management_tag = top
            .management_tag
            .or(base.management_tag)
            .unwrap_or_else(default_management_tag);
        if management_tag.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "management_tag",
                message: "must not be empty".to_string(),
            });
        }

        Ok(AppConfig {
            email: top.email.or(base.email),
            api_token: top.api_token.or(base.api_token),
            synthetics_url: top
                .synthetics_url
                .or(base.synthetics_url)
                .unwrap_or_else(|| DEFAULT_SYNTHETICS_URL.to_string()),
            label_url: top
                .label_url
                .or(base.label_url)
                .unwrap_or_else(|| DEFAULT_LABEL_URL.to_string()),
            site_url: top
                .site_url
                .or(base.site_url)
                .unwrap_or_else(|| DEFAULT_SITE_URL.to_string()),
            management_tag,
            agent_class,
            request_timeout_secs: top
                .request_timeout_secs
                .or(base.request_timeout_secs)
                .unwrap_or(30),
            max_retries: top.max_retries.or(base.max_retries).unwrap_or(4),
            initial_backoff_ms: top.initial_backoff_ms.or(base.initial_backoff_ms).unwrap_or(500),
            max_backoff_ms: top.max_backoff_ms.or(base.max_backoff_ms).unwrap_or(30_000),
            min_request_interval_ms: top
                .min_request_interval_ms
                .or(base.min_request_interval_ms)
                .unwrap_or(200),
            log_dir: top.log_dir.or(base.log_dir).unwrap_or_else(default_log_dir),
        })
    }

    /// Gateway settings. Credentials are only required here, so commands
    /// that never reach the remote service can run without them.
    pub fn gateway_config(&self) -> Result<HttpGatewayConfig, ConfigError> {
        let email = self.email.clone().ok_or(ConfigError::Missing("KENTIK_EMAIL"))?;
        let api_token = self.api_token.clone().ok_or(ConfigError::Missing("KENTIK_API_TOKEN"))?;

        let mut config = HttpGatewayConfig::new(email, api_token);
        config.synthetics_url = self.synthetics_url.clone();
        config.label_url = self.label_url.clone();
        config.site_url = self.site_url.clone();
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.max_retries = self.max_retries;
        config.initial_backoff = Duration::from_millis(self.initial_backoff_ms);
        config.max_backoff = Duration::from_millis(self.max_backoff_ms);
        config.min_request_interval = Duration::from_millis(self.min_request_interval_ms);
        Ok(config)
    }
}
