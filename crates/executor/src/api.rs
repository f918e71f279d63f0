// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The executor contract: states, statuses, results.

use async_trait::async_trait;
use gantry_core::{JobDefinition, TaskErrorRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Executor-side state of a job.
///
/// The happy path is a pipeline:
/// `UNKNOWN -> PREPARING -> PREPARED -> EXECUTING -> EXECUTED -> FINALIZING
/// -> FINALIZED`, with `ERROR` reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorState {
    /// The executor tracks only active jobs; anything else is unknown
    Unknown,
    /// Preparing to run: creating volumes, checking out code, copying inputs
    Preparing,
    /// Job volume is prepared and ready to run
    Prepared,
    /// Container currently executing
    Executing,
    /// Process finished; an exit code is available
    Executed,
    /// Outputs being extracted, logs written, results computed
    Finalizing,
    /// Finalization complete; results are available
    Finalized,
    /// Something went wrong with the executor (not the job itself)
    Error,
}

impl ExecutorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorState::Unknown => "unknown",
            ExecutorState::Preparing => "preparing",
            ExecutorState::Prepared => "prepared",
            ExecutorState::Executing => "executing",
            ExecutorState::Executed => "executed",
            ExecutorState::Finalizing => "finalizing",
            ExecutorState::Finalized => "finalized",
            ExecutorState::Error => "error",
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A point-in-time status report for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: ExecutorState,
    #[serde(default)]
    pub message: Option<String>,
    /// Nanosecond timestamp this status was observed on the agent host
    pub timestamp_ns: i64,
    /// Populated once the job is finalized
    #[serde(default)]
    pub results: Option<JobResults>,
}

impl JobStatus {
    pub fn new(state: ExecutorState, timestamp_ns: i64) -> Self {
        Self {
            state,
            message: None,
            timestamp_ns,
            results: None,
        }
    }
}

/// The full, unredacted results of a finalized job.
///
/// These stay on the agent side; the controller only ever sees the redacted
/// `JobTaskResults` derived from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    /// Produced files matching the output spec, mapped to privacy levels
    pub outputs: BTreeMap<String, String>,
    /// Spec patterns that matched no produced file
    pub unmatched_patterns: Vec<String>,
    /// Produced files that matched no spec pattern
    pub unmatched_outputs: Vec<String>,
    pub exit_code: Option<i64>,
    pub image_id: String,
    pub message: Option<String>,
    pub unmatched_hint: Option<String>,
    /// Timestamp the results were finalized, integer nanoseconds
    pub timestamp_ns: Option<i64>,
    /// Files not copied to level 4 (too big or similar), file -> reason
    pub level4_excluded_files: BTreeMap<String, String>,
    // Extracted from the image labels
    pub action_version: String,
    pub action_revision: String,
    pub action_created: String,
    pub base_revision: String,
    pub base_created: String,
}

/// Errors from executor operations.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A temporary issue; the agent leaves job state untouched and retries
    /// on its next tick.
    #[error("executor retry: {0}")]
    Retry(String),
    #[error("executor error: {0}")]
    Error(String),
}

/// The abstract container-runtime API.
///
/// All transition methods must be idempotent: calling one while its work is
/// already underway (or done) must not start anything new. A crash between
/// task creation and executor start is therefore safe: on the next tick the
/// task is still active, the executor still reports UNKNOWN, and prepare
/// runs again.
#[async_trait]
pub trait ExecutorApi: Send + Sync {
    /// Launch preparation: create the ephemeral workspace, check out the
    /// study code, copy declared inputs.
    async fn prepare(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError>;

    /// Launch execution of a prepared job.
    async fn execute(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError>;

    /// Extract outputs, write logs, compute results. With `cancelled`, only
    /// the log and a cancellation marker are preserved. With `error`, the
    /// error record is persisted so a later status query can report it.
    async fn finalize(
        &self,
        job: &JobDefinition,
        cancelled: bool,
        error: Option<&TaskErrorRecord>,
    ) -> Result<JobStatus, ExecutorError>;

    /// Kill a running job. Termination is an expected state, not an error.
    async fn terminate(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError>;

    /// Remove any remaining containers/volumes for a finished job.
    async fn cleanup(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError>;

    /// Current state of the job from the executor's perspective.
    async fn get_status(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError>;

    /// Finalized results for a job. Only meaningful once FINALIZED.
    async fn get_results(&self, job: &JobDefinition) -> Result<JobResults, ExecutorError>;
}
