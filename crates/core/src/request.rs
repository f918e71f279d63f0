// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client-facing request contract consumed by the DAG resolver.

use serde::{Deserialize, Serialize};

/// A validated request to run a set of actions for a workspace.
///
/// This is the client-facing contract; the agent-facing contract is the
/// separate [`crate::definition::JobDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// The RAP id; job ids are derived from it
    pub id: String,
    pub backend: String,
    pub workspace: String,
    pub repo_url: String,
    pub commit: String,
    #[serde(default)]
    pub branch: String,
    pub database_name: String,
    /// May contain the sentinel [`crate::project::RUN_ALL`]
    pub requested_actions: Vec<String>,
    /// When false, any new database job fails the whole request
    #[serde(default)]
    pub codelists_ok: bool,
    #[serde(default)]
    pub force_run_dependencies: bool,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub orgs: Vec<String>,
    /// Dataset/component access scope, passed through to database jobs
    #[serde(default)]
    pub analysis_scope: Option<serde_json::Value>,
    /// The raw request JSON as received, archived for telemetry and audit
    #[serde(default)]
    pub original: serde_json::Value,
}

/// Archive of the original client request, keyed by RAP id.
///
/// Once jobs are created the request itself is no longer needed, but fields
/// from the raw JSON (user, project, orgs) enrich telemetry spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRapRequest {
    pub id: String,
    pub original: serde_json::Value,
}
