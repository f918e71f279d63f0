// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration, read from the environment.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {key}")]
    Missing { key: String },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// All agent settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// The backend this agent serves
    pub backend: String,
    /// Base URL of the controller's task RPC
    pub task_api_endpoint: String,
    pub task_api_token: String,
    /// Dummy-data backends run without real database credentials
    pub using_dummy_data_backend: bool,
    /// Database name -> connection URL, injected into db jobs at the
    /// PREPARED stage
    pub database_urls: HashMap<String, String>,
    pub temp_database_name: Option<String>,
    pub db_tls_cert: Option<String>,
    pub db_tls_key: Option<String>,
    pub organisation_hash: Option<String>,
    pub job_loop_interval: Duration,
    pub stats_poll_interval: Duration,
}

impl AgentConfig {
    /// Defaults for tests: a `test` backend pointed at a local controller.
    pub fn defaults() -> Self {
        Self {
            backend: "test".to_string(),
            task_api_endpoint: "http://localhost:8000".to_string(),
            task_api_token: "token".to_string(),
            using_dummy_data_backend: false,
            database_urls: HashMap::new(),
            temp_database_name: None,
            db_tls_cert: None,
            db_tls_key: None,
            organisation_hash: None,
            job_loop_interval: Duration::from_secs(5),
            stats_poll_interval: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let require = |key: &str| -> Result<String, ConfigError> {
            vars.get(key).cloned().ok_or_else(|| ConfigError::Missing {
                key: key.to_string(),
            })
        };

        let mut config = Self::defaults();
        config.backend = require("BACKEND")?;
        config.task_api_endpoint = require("TASK_API_ENDPOINT")?;
        config.task_api_token = require("TASK_API_TOKEN")?;
        config.using_dummy_data_backend = vars
            .get("USING_DUMMY_DATA_BACKEND")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        // Database URLs come in as {NAME}_DATABASE_URL
        for (key, value) in vars {
            if let Some(name) = key.strip_suffix("_DATABASE_URL") {
                config
                    .database_urls
                    .insert(name.to_lowercase(), value.clone());
            }
        }
        config.temp_database_name = vars.get("TEMP_DATABASE_NAME").cloned();
        config.db_tls_cert = vars.get("DB_TLS_CERT").cloned();
        config.db_tls_key = vars.get("DB_TLS_KEY").cloned();
        config.organisation_hash = vars.get("ORGANISATION_HASH").cloned();

        if let Some(value) = vars.get("JOB_LOOP_INTERVAL") {
            config.job_loop_interval =
                Duration::from_secs_f64(value.parse().map_err(|_| ConfigError::Invalid {
                    key: "JOB_LOOP_INTERVAL".to_string(),
                    value: value.clone(),
                })?);
        }
        if let Some(value) = vars.get("STATS_POLL_INTERVAL") {
            config.stats_poll_interval =
                Duration::from_secs_f64(value.parse().map_err(|_| ConfigError::Invalid {
                    key: "STATS_POLL_INTERVAL".to_string(),
                    value: value.clone(),
                })?);
        }
        Ok(config)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
