// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The database maintenance probe.
//!
//! The probe itself (a minimal container restricted to the database
//! network) lives behind [`StatusProbe`]; this module owns the status
//! allowlist. Even a compromised probe container can only ever report one
//! of two states, so it cannot exfiltrate data through this channel.

use async_trait::async_trait;
use gantry_core::flag::MODE_DB_MAINTENANCE;
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("database probe failed: {0}")]
    Failed(String),
}

/// Probe a database for maintenance mode, returning its raw status line.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn database_status(&self, database_name: &str) -> Result<String, ProbeError>;
}

/// Validate a probe result against the allowlist.
///
/// Only the empty string (normal operation) and `db-maintenance` are
/// acceptable; anything else is an error.
pub fn validate_db_status(status: &str) -> Result<&str, crate::error::AgentError> {
    if status.is_empty() || status == MODE_DB_MAINTENANCE {
        Ok(status)
    } else {
        Err(crate::error::AgentError::InvalidDbStatus {
            status: status.to_string(),
        })
    }
}

/// Scriptable probe for tests and the dummy-data backend.
#[derive(Default, Clone)]
pub struct FakeStatusProbe {
    responses: std::sync::Arc<Mutex<VecDeque<Result<String, String>>>>,
}

impl FakeStatusProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the status the next probe call returns. With nothing queued
    /// the probe reports normal operation.
    pub fn push_status(&self, status: &str) {
        self.responses.lock().push_back(Ok(status.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        self.responses.lock().push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl StatusProbe for FakeStatusProbe {
    async fn database_status(&self, _database_name: &str) -> Result<String, ProbeError> {
        match self.responses.lock().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(ProbeError::Failed(message)),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
#[path = "dbstatus_tests.rs"]
mod tests;
