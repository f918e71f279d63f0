// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Database secret injection.
//!
//! Secrets go into the job environment only at the PREPARED stage, never
//! earlier: the prepare step builds the workspace image, and nothing secret
//! may land in it.

use crate::config::AgentConfig;
use crate::error::AgentError;
use gantry_core::JobDefinition;

/// Inject the configured database secrets into the job's environment.
///
/// Dummy-data backends run without credentials, so injection is skipped
/// entirely there.
pub fn inject_db_secrets(config: &AgentConfig, job: &mut JobDefinition) -> Result<(), AgentError> {
    if config.using_dummy_data_backend {
        return Ok(());
    }

    let name = job.database_name.clone().unwrap_or_default();
    let url = config
        .database_urls
        .get(&name)
        .ok_or_else(|| AgentError::UnknownDatabase { name: name.clone() })?;

    job.env.insert("DATABASE_URL".to_string(), url.clone());
    if let Some(temp) = &config.temp_database_name {
        job.env
            .insert("TEMP_DATABASE_NAME".to_string(), temp.clone());
    }
    if let (Some(cert), Some(key)) = (&config.db_tls_cert, &config.db_tls_key) {
        job.env.insert("DB_TLS_CERT".to_string(), cert.clone());
        job.env.insert("DB_TLS_KEY".to_string(), key.clone());
    }
    if let Some(hash) = &config.organisation_hash {
        job.env
            .insert("ORGANISATION_HASH".to_string(), hash.clone());
    }
    Ok(())
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
