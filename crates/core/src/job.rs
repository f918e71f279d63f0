// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Job record: one scheduled execution of one action in one
//! backend/workspace.

use crate::id::JobId;
use crate::status::{State, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Output specification: privacy level -> {output name -> glob pattern}.
pub type OutputSpec = BTreeMap<String, BTreeMap<String, String>>;

/// A job derived from one requested action.
///
/// Owned by the controller; only the external request handler ever writes
/// `cancelled` (append-only), and the controller never touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Deterministic hash of `rap_id` + `action`, so re-creating the same
    /// request maps onto the same jobs.
    pub id: JobId,
    /// The RAP request this job was created from
    pub rap_id: String,
    /// The backend this job runs on
    pub backend: String,
    /// Name of the workspace (effectively, the output directory)
    pub workspace: String,
    /// Name of the action within the pipeline
    pub action: String,
    pub state: State,
    /// Machine-readable refinement of `state`
    pub status_code: StatusCode,
    /// Human-readable description of what is currently happening
    pub status_message: String,
    /// Nanosecond timestamp of the last status-code change; monotone
    /// non-decreasing over the job's lifetime
    pub status_code_updated_at: i64,
    /// Git repository URL of the study code
    pub repo_url: String,
    /// Full commit sha
    pub commit: String,
    /// Database to query against, for database actions
    pub database_name: Option<String>,
    /// Does the job require database access?
    pub requires_db: bool,
    /// The run command to execute (image plus arguments)
    pub run_command: String,
    /// Action names whose outputs are inputs to this action
    pub requires_outputs_from: Vec<String>,
    /// Subset of the dependency jobs that had not finished when this job was
    /// scheduled; the job waits for these before starting
    pub wait_for_job_ids: Vec<JobId>,
    pub output_spec: OutputSpec,
    /// Set by the external request handler when the user cancels; never
    /// cleared
    pub cancelled: bool,
    // Times, stored as integer UNIX timestamps in seconds
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Serialized trace context of the job's root span
    pub trace_context: HashMap<String, String>,
    /// Dataset/component access scope for database actions, stored verbatim
    pub analysis_scope: Option<serde_json::Value>,
    /// Repo URL override when the action is a reusable action
    pub action_repo_url: Option<String>,
    /// Commit override when the action is a reusable action
    pub action_commit: Option<String>,
}

impl Job {
    /// Active jobs are the ones the controller loop still handles.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Split the run command into the image and its arguments.
    pub fn action_args(&self) -> Vec<String> {
        self.run_command
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
