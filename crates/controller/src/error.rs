// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the controller loop and task API.

use gantry_core::{JobId, TaskId, TransitionError};
use gantry_storage::StorageError;
use thiserror::Error;

/// Errors raised while handling jobs and task updates.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("running job {job} has no task")]
    TaskMissing { job: JobId },
    #[error("a RUNJOB task for job {job} is still active")]
    TaskStillActive { job: JobId },
    #[error("unknown task: {task}")]
    UnknownTask { task: TaskId },
    #[error("{0}")]
    Internal(String),
}

/// Should an error thrown while handling a job be fatal to the job?
///
/// No error classes are currently treated as fatal; the paths exist and are
/// exercised in tests via a marker string until the real classes are
/// enumerated.
pub fn is_fatal_controller_error(err: &ControllerError) -> bool {
    err.to_string().contains("test_hard_failure")
}

/// Should an error reported by the agent be fatal to the job?
///
/// An example would be version skew between agent and controller making the
/// agent report exceptions for an API change. Placeholder predicate, as
/// above.
pub fn is_fatal_job_error(message: &str) -> bool {
    message.contains("test_job_failure")
}
