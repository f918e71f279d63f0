// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent error types.

use crate::task_api::TaskApiError;
use gantry_executor::ExecutorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    TaskApi(#[from] TaskApiError),
    #[error("invalid task definition: {0}")]
    Definition(#[from] serde_json::Error),
    #[error("database name '{name}' is not configured for this backend")]
    UnknownDatabase { name: String },
    #[error("invalid database status '{status}', expected one of: , db-maintenance")]
    InvalidDbStatus { status: String },
    #[error("{count} task(s) failed, restarting agent loop")]
    TasksFailed { count: usize },
}

/// Should an error thrown while handling a task be fatal to the task?
///
/// No error classes are currently treated as fatal; the paths exist and are
/// exercised in tests via a marker string until the real classes are
/// enumerated.
pub fn is_fatal_task_error(err: &AgentError) -> bool {
    err.to_string().contains("test_hard_failure")
}
