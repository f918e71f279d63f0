// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller configuration, read from the environment.

use gantry_core::Job;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {key}")]
    Missing { key: String },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
    #[error("cannot read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// Per-backend action weights: workspace -> [(action pattern, weight)].
pub type ResourceWeights = HashMap<String, HashMap<String, Vec<(Regex, f64)>>>;

/// All controller settings.
#[derive(Debug)]
pub struct ControllerConfig {
    pub backends: Vec<String>,
    /// Worker capacity per backend; job weights count against this
    pub max_workers: HashMap<String, f64>,
    /// Concurrent database jobs per backend
    pub max_db_workers: HashMap<String, usize>,
    /// Bearer token each backend's agent authenticates with
    pub job_server_tokens: HashMap<String, String>,
    /// Client token -> backends it may operate on
    pub client_tokens: HashMap<String, Vec<String>>,
    pub allowed_github_orgs: Vec<String>,
    pub valid_database_names: Vec<String>,
    pub maintenance_enabled_backends: Vec<String>,
    pub job_loop_interval: Duration,
    pub tick_poll_interval: Duration,
    pub maintenance_poll_interval: Duration,
    pub default_cpu_count: HashMap<String, f64>,
    pub default_memory_limit: HashMap<String, String>,
    pub level4_max_filesize: u64,
    pub level4_max_csv_rows: u64,
    pub level4_file_types: Vec<String>,
    pub docker_registry: String,
    pub resource_weights: ResourceWeights,
    pub database_path: PathBuf,
    pub bind_address: String,
}

impl ControllerConfig {
    /// Defaults for a known backend list; environment overrides come in via
    /// [`ControllerConfig::from_vars`].
    pub fn defaults_for(backends: &[&str]) -> Self {
        let backends: Vec<String> = backends.iter().map(|b| b.to_string()).collect();
        let max_workers = backends
            .iter()
            .map(|b| (b.clone(), default_workers(b)))
            .collect::<HashMap<_, _>>();
        let max_db_workers = max_workers
            .iter()
            .map(|(b, w)| (b.clone(), *w as usize))
            .collect();
        Self {
            max_db_workers,
            job_server_tokens: backends
                .iter()
                .map(|b| (b.clone(), "token".to_string()))
                .collect(),
            client_tokens: HashMap::new(),
            allowed_github_orgs: vec!["permitted".to_string()],
            valid_database_names: vec!["default".to_string(), "include_t1oo".to_string()],
            maintenance_enabled_backends: vec![],
            job_loop_interval: Duration::from_secs(5),
            tick_poll_interval: Duration::from_secs(30),
            maintenance_poll_interval: Duration::from_secs(300),
            default_cpu_count: backends.iter().map(|b| (b.clone(), 2.0)).collect(),
            default_memory_limit: backends
                .iter()
                .map(|b| (b.clone(), "4G".to_string()))
                .collect(),
            level4_max_filesize: 16 * 1024 * 1024,
            level4_max_csv_rows: 5000,
            level4_file_types: vec![".csv".to_string()],
            docker_registry: "ghcr.io/gantry-images".to_string(),
            resource_weights: ResourceWeights::new(),
            database_path: PathBuf::from("gantry.sqlite"),
            bind_address: "127.0.0.1:8000".to_string(),
            max_workers,
            backends,
        }
    }

    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build the configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let backends_csv = vars
            .get("BACKENDS")
            .cloned()
            .ok_or_else(|| ConfigError::Missing {
                key: "BACKENDS".to_string(),
            })?;
        let backends: Vec<&str> = backends_csv
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .collect();
        let mut config = Self::defaults_for(&backends);

        let backend_names = config.backends.clone();
        for backend in &backend_names {
            let upper = backend.to_uppercase();
            if let Some(value) = vars.get(&format!("{upper}_MAX_WORKERS")) {
                config
                    .max_workers
                    .insert(backend.clone(), parse(value, &format!("{upper}_MAX_WORKERS"))?);
            }
            if let Some(value) = vars.get(&format!("{upper}_MAX_DB_WORKERS")) {
                config.max_db_workers.insert(
                    backend.clone(),
                    parse(value, &format!("{upper}_MAX_DB_WORKERS"))?,
                );
            }
            if let Some(value) = vars.get(&format!("{upper}_JOB_SERVER_TOKEN")) {
                config
                    .job_server_tokens
                    .insert(backend.clone(), value.clone());
            }
            if let Some(value) = vars.get(&format!("{upper}_CLIENT_TOKENS")) {
                for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    config
                        .client_tokens
                        .entry(token.to_string())
                        .or_default()
                        .push(backend.clone());
                }
            }
            if let Some(value) = vars.get(&format!("{upper}_JOB_CPU_COUNT")) {
                config
                    .default_cpu_count
                    .insert(backend.clone(), parse(value, &format!("{upper}_JOB_CPU_COUNT"))?);
            }
            if let Some(value) = vars.get(&format!("{upper}_JOB_MEMORY_LIMIT")) {
                config
                    .default_memory_limit
                    .insert(backend.clone(), value.clone());
            }
        }

        if let Some(value) = vars.get("ALLOWED_GITHUB_ORGS") {
            config.allowed_github_orgs = csv(value);
        }
        if let Some(value) = vars.get("MAINTENANCE_ENABLED_BACKENDS") {
            config.maintenance_enabled_backends = csv(value);
        }
        if let Some(value) = vars.get("JOB_LOOP_INTERVAL") {
            config.job_loop_interval = Duration::from_secs_f64(parse(value, "JOB_LOOP_INTERVAL")?);
        }
        if let Some(value) = vars.get("TICK_POLL_INTERVAL") {
            config.tick_poll_interval = Duration::from_secs_f64(parse(value, "TICK_POLL_INTERVAL")?);
        }
        if let Some(value) = vars.get("MAINTENANCE_POLL_INTERVAL") {
            config.maintenance_poll_interval =
                Duration::from_secs_f64(parse(value, "MAINTENANCE_POLL_INTERVAL")?);
        }
        if let Some(value) = vars.get("LEVEL4_MAX_FILESIZE") {
            config.level4_max_filesize = parse(value, "LEVEL4_MAX_FILESIZE")?;
        }
        if let Some(value) = vars.get("LEVEL4_MAX_CSV_ROWS") {
            config.level4_max_csv_rows = parse(value, "LEVEL4_MAX_CSV_ROWS")?;
        }
        if let Some(value) = vars.get("DOCKER_REGISTRY") {
            config.docker_registry = value.clone();
        }
        if let Some(value) = vars.get("DATABASE_FILE") {
            config.database_path = PathBuf::from(value);
        }
        if let Some(value) = vars.get("BIND_ADDRESS") {
            config.bind_address = value.clone();
        }
        if let Some(path) = vars.get("RESOURCE_WEIGHTS_FILE") {
            let path = PathBuf::from(path);
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Unreadable {
                path: path.clone(),
                message: e.to_string(),
            })?;
            config.resource_weights = parse_resource_weights(&text)?;
        }

        Ok(config)
    }

    pub fn is_known_backend(&self, backend: &str) -> bool {
        self.backends.iter().any(|b| b == backend)
    }

    pub fn max_workers_for(&self, backend: &str) -> f64 {
        self.max_workers.get(backend).copied().unwrap_or(10.0)
    }

    pub fn max_db_workers_for(&self, backend: &str) -> usize {
        self.max_db_workers.get(backend).copied().unwrap_or(10)
    }

    pub fn cpu_count_for(&self, backend: &str) -> f64 {
        self.default_cpu_count.get(backend).copied().unwrap_or(2.0)
    }

    pub fn memory_limit_for(&self, backend: &str) -> String {
        self.default_memory_limit
            .get(backend)
            .cloned()
            .unwrap_or_else(|| "4G".to_string())
    }

    /// Backends a client token may operate on (empty when unknown).
    pub fn backends_for_client_token(&self, token: &str) -> Vec<String> {
        self.client_tokens.get(token).cloned().unwrap_or_default()
    }

    /// A job's resource weight: the first matching action pattern for its
    /// backend/workspace, defaulting to 1.
    pub fn resource_weight(&self, job: &Job) -> f64 {
        if let Some(workspaces) = self.resource_weights.get(&job.backend) {
            if let Some(patterns) = workspaces.get(&job.workspace) {
                for (pattern, weight) in patterns {
                    if pattern.is_match(&job.action) {
                        return *weight;
                    }
                }
            }
        }
        1.0
    }
}

fn default_workers(backend: &str) -> f64 {
    // The test backend is deliberately small so scheduling pressure is easy
    // to produce.
    if backend == "test" {
        2.0
    } else {
        10.0
    }
}

fn csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parse the resource-weights TOML:
///
/// ```toml
/// [test.some-workspace]
/// "heavy-action-.*" = 4.0
/// ```
///
/// Patterns must match the whole action name. The first matching pattern
/// wins, in declaration order, so the pattern maps deserialize into an
/// order-preserving map rather than a `HashMap`.
pub fn parse_resource_weights(text: &str) -> Result<ResourceWeights, ConfigError> {
    let raw: HashMap<String, HashMap<String, indexmap::IndexMap<String, f64>>> =
        toml::from_str(text).map_err(|e| ConfigError::Invalid {
            key: "RESOURCE_WEIGHTS_FILE".to_string(),
            value: e.to_string(),
        })?;
    let mut weights = ResourceWeights::new();
    for (backend, workspaces) in raw {
        let mut per_workspace = HashMap::new();
        for (workspace, patterns) in workspaces {
            let mut compiled = Vec::new();
            for (pattern, weight) in patterns {
                let anchored = format!("^(?:{})$", pattern);
                let regex = Regex::new(&anchored).map_err(|e| ConfigError::Invalid {
                    key: format!("resource weight pattern for {backend}/{workspace}"),
                    value: format!("{pattern}: {e}"),
                })?;
                compiled.push((regex, weight));
            }
            per_workspace.insert(workspace, compiled);
        }
        weights.insert(backend, per_workspace);
    }
    Ok(weights)
}

/// Map known database-related exit codes to user-friendly messages.
pub fn database_exit_code_message(exit_code: i64) -> Option<&'static str> {
    match exit_code {
        3 => Some(
            "A transient database error occurred, your job may run if you try it again, \
             if it keeps failing then contact tech support",
        ),
        4 => Some("New data is being imported into the database, please try again in a few hours"),
        5 => Some("Something went wrong with the database, please contact tech support"),
        10 => Some(
            "There was a problem reading your ehrQL code; please confirm that it runs locally",
        ),
        11 => Some("There was a problem reading one of the supplied data files"),
        12 => Some("You do not have the required permissions for the ehrQL you are trying to run"),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
