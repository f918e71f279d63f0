// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The DAG resolver: expand a CreateRequest into new Jobs with dependency
//! links, reusing existing jobs where their results are still good.

use crate::config::ControllerConfig;
use crate::job_tracing::JobTracer;
use crate::projects::{ProjectError, ProjectSource};
use gantry_core::{
    Clock, CreateRequest, Job, JobId, ProjectDefinition, SavedRapRequest, State, StatusCode,
    RUN_ALL,
};
use gantry_storage::queries::calculate_workspace_state;
use gantry_storage::{insert, upsert, Database, StorageError};
use rusqlite::types::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CreateJobsError {
    /// Everything requested has already run or is running. A successful
    /// outcome from the client's point of view.
    #[error("{0}")]
    NothingToDo(String),
    /// Codelists are out of date and the request includes database work.
    #[error("{0}")]
    StaleCodelists(String),
    /// The request itself is bad; the message is safe to show the client.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Internal(String),
}

/// Create jobs for a request. Returns how many new jobs were inserted.
pub async fn create_jobs<C: Clock>(
    db: &Database,
    config: &ControllerConfig,
    projects: &dyn ProjectSource,
    tracer: &JobTracer,
    clock: &C,
    request: &CreateRequest,
) -> Result<usize, CreateJobsError> {
    validate_request(config, request)?;
    projects
        .validate_commit(&request.repo_url, &request.branch, &request.commit)
        .await?;
    let project = projects
        .load_project(&request.repo_url, &request.commit)
        .await?;

    let project_actions: BTreeSet<&String> = project.actions.keys().collect();
    let current_jobs: Vec<Job> = db
        .with(|conn| calculate_workspace_state(conn, &request.backend, &request.workspace))?
        .into_iter()
        .filter(|job| project_actions.contains(&job.action))
        .collect();

    let mut new_jobs = resolve_new_jobs(request, &project, &current_jobs, clock)?;
    assert_new_jobs_created(request, &new_jobs, &current_jobs)?;
    assert_codelists_ok(request, &new_jobs)?;

    for job in &mut new_jobs {
        tracer.initialise_job_trace(job);
    }

    // There is a delay between reading the current jobs and inserting below,
    // but this function is the only place jobs are created and the process
    // is the single writer, so the only state change possible in between is
    // an active job completing. Jobs waiting on it will simply see it
    // completed on their first dependency check.
    db.transaction::<_, StorageError>(|conn| {
        upsert(
            conn,
            &SavedRapRequest {
                id: request.id.clone(),
                original: request.original.clone(),
            },
        )?;
        for job in &new_jobs {
            insert(conn, job)?;
        }
        Ok(())
    })?;

    info!(
        rap_id = %request.id,
        backend = %request.backend,
        workspace = %request.workspace,
        count = new_jobs.len(),
        "created jobs"
    );
    Ok(new_jobs.len())
}

fn validate_request(
    config: &ControllerConfig,
    request: &CreateRequest,
) -> Result<(), CreateJobsError> {
    if request.requested_actions.is_empty() {
        return Err(CreateJobsError::Validation(
            "At least one action must be supplied".to_string(),
        ));
    }
    if request.workspace.is_empty() {
        return Err(CreateJobsError::Validation(
            "Workspace name cannot be blank".to_string(),
        ));
    }
    if !request
        .workspace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CreateJobsError::Validation(
            "Invalid workspace name (allowed are alphanumeric, dash and underscore)".to_string(),
        ));
    }
    if !config.is_known_backend(&request.backend) {
        return Err(CreateJobsError::Validation(format!(
            "Invalid backend '{}', allowed are: {}",
            request.backend,
            config.backends.join(", "),
        )));
    }
    if !config
        .valid_database_names
        .iter()
        .any(|name| name == &request.database_name)
    {
        return Err(CreateJobsError::Validation(format!(
            "Invalid database name '{}', allowed are: {}",
            request.database_name,
            config.valid_database_names.join(", "),
        )));
    }
    validate_repo_url(&request.repo_url, &config.allowed_github_orgs)
}

/// The repo must live under one of the permitted GitHub organisations.
pub fn validate_repo_url(repo_url: &str, allowed_orgs: &[String]) -> Result<(), CreateJobsError> {
    let rest = repo_url
        .strip_prefix("https://github.com/")
        .ok_or_else(|| {
            CreateJobsError::Validation(format!("Repository URL is not on GitHub: {repo_url}"))
        })?;
    let mut segments = rest.split('/');
    let org = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    if org.is_empty() || repo.is_empty() {
        return Err(CreateJobsError::Validation(format!(
            "Invalid repository URL: {repo_url}"
        )));
    }
    if !allowed_orgs
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(org))
    {
        return Err(CreateJobsError::Validation(format!(
            "Repositories must belong to one of the following organisations: {}",
            allowed_orgs.join(", "),
        )));
    }
    Ok(())
}

/// Resolve which jobs need creating, wiring `wait_for_job_ids` to the direct
/// dependencies that are still pending or running after expansion.
fn resolve_new_jobs<C: Clock>(
    request: &CreateRequest,
    project: &ProjectDefinition,
    current_jobs: &[Job],
    clock: &C,
) -> Result<Vec<Job>, CreateJobsError> {
    let mut jobs_by_action: BTreeMap<String, Job> = current_jobs
        .iter()
        .map(|job| (job.action.clone(), job.clone()))
        .collect();
    let current_ids: BTreeSet<JobId> = current_jobs.iter().map(|job| job.id.clone()).collect();

    let actions_to_run: Vec<String> = if request.requested_actions.iter().any(|a| a == RUN_ALL) {
        project.all_actions()
    } else {
        request.requested_actions.clone()
    };

    let mut stack = Vec::new();
    for action in &actions_to_run {
        build_job_tree(&mut jobs_by_action, request, project, action, clock, &mut stack)?;
    }

    Ok(jobs_by_action
        .into_values()
        .filter(|job| !current_ids.contains(&job.id))
        .collect())
}

/// Recursively ensure a job exists for `action` and its transitive needs.
fn build_job_tree<C: Clock>(
    jobs_by_action: &mut BTreeMap<String, Job>,
    request: &CreateRequest,
    project: &ProjectDefinition,
    action: &str,
    clock: &C,
    stack: &mut Vec<String>,
) -> Result<(), CreateJobsError> {
    if stack.iter().any(|a| a == action) {
        return Err(CreateJobsError::Validation(format!(
            "Circular dependency involving action '{action}'"
        )));
    }
    if let Some(existing) = jobs_by_action.get(action) {
        if !job_should_be_rerun(request, existing) {
            return Ok(());
        }
    }
    let spec = project.action(action).ok_or_else(|| {
        CreateJobsError::Validation(format!("Action '{action}' not found in project"))
    })?;

    stack.push(action.to_string());
    let mut wait_for_job_ids = Vec::new();
    for needed in &spec.needs {
        build_job_tree(jobs_by_action, request, project, needed, clock, stack)?;
        let dependency = jobs_by_action.get(needed).ok_or_else(|| {
            CreateJobsError::Internal(format!("dependency '{needed}' was not resolved"))
        })?;
        if dependency.state.is_active() {
            wait_for_job_ids.push(dependency.id.clone());
        }
    }
    stack.pop();

    let now_s = clock.epoch_s();
    let now_ns = clock.epoch_ns();
    let analysis_scope = if spec.is_database_action {
        request.analysis_scope.clone()
    } else {
        None
    };

    let job = Job {
        id: JobId::for_action(&request.id, action),
        rap_id: request.id.clone(),
        backend: request.backend.clone(),
        workspace: request.workspace.clone(),
        action: action.to_string(),
        state: State::Pending,
        status_code: StatusCode::Created,
        status_message: "Created".to_string(),
        status_code_updated_at: now_ns,
        repo_url: request.repo_url.clone(),
        commit: request.commit.clone(),
        database_name: Some(request.database_name.clone()),
        requires_db: spec.is_database_action,
        run_command: spec.run.clone(),
        requires_outputs_from: spec.needs.clone(),
        wait_for_job_ids,
        output_spec: spec.outputs.clone(),
        cancelled: false,
        created_at: now_s,
        updated_at: now_s,
        started_at: None,
        completed_at: None,
        trace_context: Default::default(),
        analysis_scope,
        action_repo_url: spec.repo_url.clone(),
        action_commit: spec.commit.clone(),
    };
    jobs_by_action.insert(action.to_string(), job);
    Ok(())
}

/// Do we need to run the action referenced by this job again?
fn job_should_be_rerun(request: &CreateRequest, job: &Job) -> bool {
    // Already running or about to run, so don't start a new one
    if job.state.is_active() {
        return false;
    }
    // Explicitly requested actions always get re-run
    if request.requested_actions.iter().any(|a| a == &job.action) {
        return true;
    }
    // Otherwise it's a dependency; forcing makes us run it regardless
    if request.force_run_dependencies {
        return true;
    }
    // Failed dependencies get re-run by default, succeeded ones are reused
    job.state == State::Failed
}

fn assert_new_jobs_created(
    request: &CreateRequest,
    new_jobs: &[Job],
    current_jobs: &[Job],
) -> Result<(), CreateJobsError> {
    if !new_jobs.is_empty() {
        return Ok(());
    }

    // "run all" with everything already run or running is a success: all the
    // requested work is already done or underway.
    if request.requested_actions.iter().any(|a| a == RUN_ALL) {
        return Err(CreateJobsError::NothingToDo(
            "All actions have already completed successfully".to_string(),
        ));
    }

    // Every requested action already pending/running is a user-visible
    // "already scheduled".
    let all_scheduled = request.requested_actions.iter().all(|action| {
        current_jobs
            .iter()
            .find(|job| &job.action == action)
            .is_some_and(|job| job.state.is_active())
    });
    if all_scheduled {
        return Err(CreateJobsError::NothingToDo(
            "All requested actions were already scheduled to run".to_string(),
        ));
    }

    // Reaching here means scheduling failed despite failed dependencies,
    // which is a bug.
    Err(CreateJobsError::Internal(
        "Unexpected job states after scheduling".to_string(),
    ))
}

fn assert_codelists_ok(request: &CreateRequest, new_jobs: &[Job]) -> Result<(), CreateJobsError> {
    if request.codelists_ok {
        return Ok(());
    }
    for job in new_jobs {
        // Out-of-date codelists fail the whole request as soon as any new
        // job needs database access
        if job.requires_db {
            return Err(CreateJobsError::StaleCodelists(format!(
                "Codelists are out of date (required by action {})",
                job.action,
            )));
        }
    }
    Ok(())
}

/// Have jobs already been created for this RAP id?
pub fn related_jobs_exist(db: &Database, rap_id: &str) -> Result<bool, StorageError> {
    db.with(|conn| {
        gantry_storage::exists_where::<Job>(
            conn,
            &gantry_storage::Filter::new().eq("rap_id", rap_id),
        )
    })
}

/// Flip the cancelled flag on jobs for the given actions.
///
/// Modifies the rows in place rather than read-modify-write: the controller
/// loop may be rewriting other fields of these jobs concurrently, and it
/// never touches `cancelled`.
pub fn set_cancelled_flag<C: Clock>(
    db: &Database,
    clock: &C,
    rap_id: &str,
    actions: &[String],
) -> Result<usize, StorageError> {
    let now = clock.epoch_s();
    db.with(|conn| {
        gantry_storage::update_where::<Job>(
            conn,
            &[
                ("cancelled", Value::from(true)),
                ("completed_at", Value::Integer(now)),
            ],
            &gantry_storage::Filter::new().eq("rap_id", rap_id).any_of(
                "action",
                actions.iter().map(|a| Value::Text(a.clone())),
            ),
        )
    })
}

/// List jobs for a RAP id (used by the status endpoint).
pub fn jobs_for_rap(db: &Database, rap_id: &str) -> Result<Vec<Job>, StorageError> {
    db.with(|conn| {
        gantry_storage::find_where(conn, &gantry_storage::Filter::new().eq("rap_id", rap_id))
    })
}

#[cfg(test)]
#[path = "create_jobs_tests.rs"]
mod tests;
