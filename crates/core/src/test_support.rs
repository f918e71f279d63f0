// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixture constructors for tests across the workspace.

use crate::definition::{JobDefinition, Study};
use crate::id::{JobId, TaskId};
use crate::job::{Job, OutputSpec};
use crate::project::{ActionSpec, ProjectDefinition};
use crate::request::CreateRequest;
use crate::status::{State, StatusCode};
use crate::task::{Task, TaskType};
use std::collections::{BTreeMap, HashMap};

/// A pending job for the given RAP and action, with sensible defaults.
pub fn job(rap_id: &str, action: &str) -> Job {
    Job {
        id: JobId::for_action(rap_id, action),
        rap_id: rap_id.to_string(),
        backend: "test".to_string(),
        workspace: "workspace".to_string(),
        action: action.to_string(),
        state: State::Pending,
        status_code: StatusCode::Created,
        status_message: "Created".to_string(),
        status_code_updated_at: 1_000_000_000_000_000_000,
        repo_url: "https://github.com/permitted/study".to_string(),
        commit: "abc123def456".to_string(),
        database_name: None,
        requires_db: false,
        run_command: format!("python:v2 python analysis/{}.py", action),
        requires_outputs_from: vec![],
        wait_for_job_ids: vec![],
        output_spec: OutputSpec::new(),
        cancelled: false,
        created_at: 1_000_000_000,
        updated_at: 1_000_000_000,
        started_at: None,
        completed_at: None,
        trace_context: HashMap::new(),
        analysis_scope: None,
        action_repo_url: None,
        action_commit: None,
    }
}

/// A RUNJOB task for a job, numbered `seq`.
pub fn runjob_task(job: &Job, seq: u32) -> Task {
    let task_id = TaskId::new(format!("{}-{:03}", job.id, seq));
    let definition = job_definition(job, &task_id);
    Task::new(
        task_id,
        TaskType::RunJob,
        job.backend.clone(),
        serde_json::to_value(definition).unwrap_or(serde_json::Value::Null),
        HashMap::new(),
    )
}

/// A JobDefinition matching a job, as the controller would dispatch it.
pub fn job_definition(job: &Job, task_id: &TaskId) -> JobDefinition {
    JobDefinition {
        id: job.id.clone(),
        rap_id: job.rap_id.clone(),
        task_id: task_id.clone(),
        study: Study {
            git_repo_url: job.repo_url.clone(),
            commit: job.commit.clone(),
        },
        workspace: job.workspace.clone(),
        action: job.action.clone(),
        created_at: job.created_at,
        image: "registry.example.com/python:v2".to_string(),
        image_sha: None,
        args: vec!["python".to_string()],
        env: BTreeMap::new(),
        inputs: vec![],
        input_job_ids: vec![],
        output_spec: BTreeMap::new(),
        allow_database_access: job.requires_db,
        database_name: job.database_name.clone(),
        cpu_count: 2.0,
        memory_limit: "4G".to_string(),
        level4_max_filesize: 16 * 1024 * 1024,
        level4_max_csv_rows: 5000,
        level4_file_types: vec![".csv".to_string()],
    }
}

/// A create request for the given actions against the `test` backend.
pub fn create_request(rap_id: &str, actions: &[&str]) -> CreateRequest {
    CreateRequest {
        id: rap_id.to_string(),
        backend: "test".to_string(),
        workspace: "workspace".to_string(),
        repo_url: "https://github.com/permitted/study".to_string(),
        commit: "abc123def456".to_string(),
        branch: "main".to_string(),
        database_name: "default".to_string(),
        requested_actions: actions.iter().map(|a| a.to_string()).collect(),
        codelists_ok: true,
        force_run_dependencies: false,
        created_by: "alice".to_string(),
        project: "project-1".to_string(),
        orgs: vec!["permitted".to_string()],
        analysis_scope: None,
        original: serde_json::json!({
            "created_by": "alice",
            "project": "project-1",
            "orgs": ["permitted"],
        }),
    }
}

/// A three-action pipeline: `generate` (db) -> `prepare` -> `analyse`.
pub fn linear_project() -> ProjectDefinition {
    let mut actions = BTreeMap::new();
    actions.insert(
        "generate".to_string(),
        ActionSpec {
            run: "ehrql:v1 generate-dataset analysis/dataset.py".to_string(),
            needs: vec![],
            outputs: OutputSpec::from([(
                "highly_sensitive".to_string(),
                BTreeMap::from([("dataset".to_string(), "output/dataset.csv".to_string())]),
            )]),
            is_database_action: true,
            repo_url: None,
            commit: None,
        },
    );
    actions.insert(
        "prepare".to_string(),
        ActionSpec {
            run: "python:v2 python analysis/prepare.py".to_string(),
            needs: vec!["generate".to_string()],
            outputs: OutputSpec::from([(
                "highly_sensitive".to_string(),
                BTreeMap::from([("prepared".to_string(), "output/prepared.csv".to_string())]),
            )]),
            is_database_action: false,
            repo_url: None,
            commit: None,
        },
    );
    actions.insert(
        "analyse".to_string(),
        ActionSpec {
            run: "python:v2 python analysis/analyse.py".to_string(),
            needs: vec!["prepare".to_string()],
            outputs: OutputSpec::from([(
                "moderately_sensitive".to_string(),
                BTreeMap::from([("report".to_string(), "output/report.csv".to_string())]),
            )]),
            is_database_action: false,
            repo_url: None,
            commit: None,
        },
    );
    ProjectDefinition { actions }
}
