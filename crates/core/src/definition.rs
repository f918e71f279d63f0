// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent-facing contracts: the JobDefinition payload dispatched inside a
//! task, and the result/update shapes reported back over the task RPC.

use crate::id::{JobId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The study code a job runs: a git repo at a specific commit.
///
/// For reusable actions this points at the action repo rather than the
/// study repo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub git_repo_url: String,
    pub commit: String,
}

/// Everything the agent needs to execute one job.
///
/// Serialized into the task `definition`; the agent never reads the job
/// table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobId,
    pub rap_id: String,
    /// The task this definition was dispatched under
    pub task_id: TaskId,
    pub study: Study,
    pub workspace: String,
    pub action: String,
    pub created_at: i64,
    /// Fully-qualified image to run
    pub image: String,
    #[serde(default)]
    pub image_sha: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Files the job requires, copied into the ephemeral workspace
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Jobs whose outputs feed this one
    #[serde(default)]
    pub input_job_ids: Vec<JobId>,
    /// Glob pattern -> privacy level
    pub output_spec: BTreeMap<String, String>,
    pub allow_database_access: bool,
    #[serde(default)]
    pub database_name: Option<String>,
    pub cpu_count: f64,
    pub memory_limit: String,
    pub level4_max_filesize: u64,
    pub level4_max_csv_rows: u64,
    pub level4_file_types: Vec<String>,
}

fn unknown() -> String {
    "unknown".to_string()
}

/// The redacted results of a RUNJOB or CANCELJOB task.
///
/// This is what the controller sees; raw output names never leave the agent
/// (the executor's full results carry them, see the agent's redaction step).
/// Wire field names are fixed by the task RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTaskResults {
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(rename = "docker_image_id", default)]
    pub image_id: String,
    #[serde(rename = "status_message", default)]
    pub message: Option<String>,
    #[serde(rename = "hint", default)]
    pub unmatched_hint: Option<String>,
    /// Timestamp these results were finalized, integer nanoseconds
    #[serde(default)]
    pub timestamp_ns: Option<i64>,
    // Extracted from the image labels
    #[serde(default = "unknown")]
    pub action_version: String,
    #[serde(default = "unknown")]
    pub action_revision: String,
    #[serde(default = "unknown")]
    pub action_created: String,
    #[serde(default = "unknown")]
    pub base_revision: String,
    #[serde(default = "unknown")]
    pub base_created: String,
    /// The job was missing outputs matching expected patterns
    #[serde(default)]
    pub has_unmatched_patterns: bool,
    /// Files were not copied to level 4 (too big or similar reason)
    #[serde(default)]
    pub has_level4_excluded_files: bool,
}

impl Default for JobTaskResults {
    fn default() -> Self {
        Self {
            exit_code: None,
            image_id: String::new(),
            message: None,
            unmatched_hint: None,
            timestamp_ns: None,
            action_version: unknown(),
            action_revision: unknown(),
            action_created: unknown(),
            base_revision: unknown(),
            base_created: unknown(),
            has_unmatched_patterns: false,
            has_level4_excluded_files: false,
        }
    }
}

/// Error record attached to a failed task's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskErrorRecord {
    /// Error type name
    pub exception: String,
    pub message: String,
    #[serde(default)]
    pub traceback: String,
}

/// The results payload a RUNJOB/CANCELJOB update carries.
///
/// `error` is set when the agent hit a fatal task error; otherwise the
/// redacted results are flattened alongside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResultsPayload {
    #[serde(default)]
    pub error: Option<TaskErrorRecord>,
    #[serde(flatten)]
    pub results: Option<JobTaskResults>,
}

/// The results payload of a simple task (currently only DBSTATUS): an
/// opaque result object or an error, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleTaskResults {
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<TaskErrorRecord>,
}

/// The task-update envelope posted by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    /// Current stage from the agent's perspective; blank for simple tasks
    pub stage: String,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    pub complete: bool,
    /// Nanosecond timestamp of the state change as measured on the agent
    #[serde(default)]
    pub timestamp_ns: Option<i64>,
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
