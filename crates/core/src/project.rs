// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pipeline contract: what the external project resolver returns.
//!
//! gantry does not parse pipeline files itself; an external resolver loads
//! the project file at a commit and returns this structure.

use crate::job::OutputSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel action name that expands to every action in the project.
pub const RUN_ALL: &str = "run_all";

/// One action in a resolved pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// The run command (image plus arguments)
    pub run: String,
    /// Actions whose outputs this action consumes
    #[serde(default)]
    pub needs: Vec<String>,
    /// Privacy level -> {output name -> glob}
    #[serde(default)]
    pub outputs: OutputSpec,
    /// Database actions are subject to db worker caps and maintenance modes
    #[serde(default)]
    pub is_database_action: bool,
    /// Repo URL override for reusable actions
    #[serde(default)]
    pub repo_url: Option<String>,
    /// Commit override for reusable actions
    #[serde(default)]
    pub commit: Option<String>,
}

/// A resolved pipeline: the action DAG for one project at one commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDefinition {
    pub actions: BTreeMap<String, ActionSpec>,
}

impl ProjectDefinition {
    pub fn all_actions(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }
}
