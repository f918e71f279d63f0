// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The project-source seam: git access and pipeline parsing live behind
//! this trait. The controller only ever sees the resolved action DAG.

use async_trait::async_trait;
use gantry_core::ProjectDefinition;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("{0}")]
    Git(String),
    #[error("no project file found: {0}")]
    NotFound(String),
    #[error("invalid project: {0}")]
    Invalid(String),
}

/// Fetch and resolve project pipelines.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    /// Check the commit exists and is reachable from the named branch.
    async fn validate_commit(
        &self,
        repo_url: &str,
        branch: &str,
        commit: &str,
    ) -> Result<(), ProjectError>;

    /// Load and parse the project file at the commit.
    async fn load_project(
        &self,
        repo_url: &str,
        commit: &str,
    ) -> Result<ProjectDefinition, ProjectError>;
}

/// In-memory project source for tests and local development.
#[derive(Default)]
pub struct FakeProjectSource {
    projects: Mutex<HashMap<String, ProjectDefinition>>,
    bad_commits: Mutex<Vec<String>>,
}

impl FakeProjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this project for every commit of `repo_url`.
    pub fn with_project(repo_url: &str, project: ProjectDefinition) -> Self {
        let source = Self::new();
        source
            .projects
            .lock()
            .insert(repo_url.to_string(), project);
        source
    }

    pub fn add_project(&self, repo_url: &str, project: ProjectDefinition) {
        self.projects.lock().insert(repo_url.to_string(), project);
    }

    /// Make `validate_commit` reject this commit.
    pub fn reject_commit(&self, commit: &str) {
        self.bad_commits.lock().push(commit.to_string());
    }
}

#[async_trait]
impl ProjectSource for FakeProjectSource {
    async fn validate_commit(
        &self,
        _repo_url: &str,
        branch: &str,
        commit: &str,
    ) -> Result<(), ProjectError> {
        if self.bad_commits.lock().iter().any(|c| c == commit) {
            return Err(ProjectError::Git(format!(
                "commit {commit} is not on branch {branch}"
            )));
        }
        Ok(())
    }

    async fn load_project(
        &self,
        repo_url: &str,
        _commit: &str,
    ) -> Result<ProjectDefinition, ProjectError> {
        self.projects
            .lock()
            .get(repo_url)
            .cloned()
            .ok_or_else(|| ProjectError::NotFound(repo_url.to_string()))
    }
}
