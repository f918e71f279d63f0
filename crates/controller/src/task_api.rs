// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller side of the task queue: creating, deactivating and
//! fetching tasks, and applying agent-reported updates.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use gantry_core::{
    flag, Clock, Job, JobDefinition, SimpleTaskResults, Study, Task, TaskId, TaskType, TaskUpdate,
};
use gantry_storage::queries::{calculate_workspace_state, get_saved_rap_request, set_flag};
use gantry_storage::{find_where, insert, update, Database, Filter, StorageError};
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::info;

/// Insert a new task into the queue, activating it and stamping creation
/// time.
pub fn insert_task<C: Clock>(
    conn: &Connection,
    clock: &C,
    task: &mut Task,
) -> Result<(), ControllerError> {
    task.created_at = Some(clock.epoch_s());
    task.active = true;
    insert(conn, task)?;
    Ok(())
}

/// Deactivate a task: the controller stops asking the agent about it.
pub fn mark_task_inactive<C: Clock>(
    conn: &Connection,
    clock: &C,
    task: &mut Task,
) -> Result<(), ControllerError> {
    task.active = false;
    task.finished_at = Some(clock.epoch_s());
    update(conn, task, &[])?;
    Ok(())
}

/// Look up a single task by id.
pub fn get_task(conn: &Connection, task_id: &TaskId) -> Result<Task, ControllerError> {
    match gantry_storage::find_one(conn, &Filter::new().eq("id", task_id.as_str())) {
        Ok(task) => Ok(task),
        Err(StorageError::NotFound { .. }) => Err(ControllerError::UnknownTask {
            task: task_id.clone(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Active tasks to send to the agent for a backend.
///
/// DBSTATUS tasks sort before RUNJOB tasks so that a controller
/// reconciling after a maintenance window sees the maintenance flag before
/// re-attempting database jobs.
pub fn get_active_tasks(conn: &Connection, backend: &str) -> Result<Vec<Task>, StorageError> {
    let mut tasks: Vec<Task> = find_where(
        conn,
        &Filter::new().eq("backend", backend).eq("active", true),
    )?;
    tasks.sort_by_key(|task| match task.kind {
        TaskType::DbStatus => 0,
        _ => 1,
    });
    Ok(tasks)
}

/// The most recent RUNJOB task for a job, if any.
///
/// Task ids are constructed so that, for a given job, lexical order matches
/// creation order.
pub fn get_task_for_job(conn: &Connection, job: &Job) -> Result<Option<Task>, ControllerError> {
    let mut tasks: Vec<Task> = find_where(
        conn,
        &Filter::new()
            .glob("id", format!("{}-*", job.id))
            .eq("type", TaskType::RunJob.as_str())
            .eq("backend", job.backend.as_str()),
    )?;
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(tasks.pop())
}

/// The most recent CANCELJOB task for a job, if any.
pub fn get_cancel_task_for_job(
    conn: &Connection,
    job: &Job,
) -> Result<Option<Task>, ControllerError> {
    let mut tasks: Vec<Task> = find_where(
        conn,
        &Filter::new()
            .glob("id", format!("{}-*", job.id))
            .eq("type", TaskType::CancelJob.as_str())
            .eq("backend", job.backend.as_str()),
    )?;
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(tasks.pop())
}

/// Create the next RUNJOB task for a job.
///
/// Every previous RUNJOB task must already be inactive; a still-active one
/// means the state machine went wrong somewhere.
pub fn create_task_for_job(
    conn: &Connection,
    config: &ControllerConfig,
    job: &Job,
) -> Result<Task, ControllerError> {
    let previous: Vec<Task> = find_where(
        conn,
        &Filter::new()
            .glob("id", format!("{}-*", job.id))
            .eq("type", TaskType::RunJob.as_str())
            .eq("backend", job.backend.as_str()),
    )?;
    if previous.iter().any(|task| task.active) {
        return Err(ControllerError::TaskStillActive {
            job: job.id.clone(),
        });
    }
    // Zero-pad the sequence so tasks sort lexically
    let task_id = TaskId::new(format!("{}-{:03}", job.id, previous.len() + 1));
    let definition = job_to_definition(conn, config, job, &task_id)?;
    Ok(Task::new(
        task_id,
        TaskType::RunJob,
        job.backend.clone(),
        serde_json::to_value(definition)?,
        task_attributes(conn, job)?,
    ))
}

/// Cancel the active RUNJOB task for a job, if there is one.
///
/// Deactivating the RUNJOB and inserting the CANCELJOB happen on the same
/// connection, inside whatever transaction the caller opened. If nothing
/// was ever sent to the agent there is nothing to cancel.
pub fn cancel_job<C: Clock>(
    conn: &Connection,
    clock: &C,
    config: &ControllerConfig,
    job: &Job,
) -> Result<(), ControllerError> {
    let Some(mut runjob) = get_task_for_job(conn, job)? else {
        return Ok(());
    };
    if !runjob.active {
        return Ok(());
    }
    mark_task_inactive(conn, clock, &mut runjob)?;
    let task_id = TaskId::new(format!("{}-cancel", runjob.id));
    let definition = job_to_definition(conn, config, job, &task_id)?;
    let mut cancel_task = Task::new(
        task_id,
        TaskType::CancelJob,
        job.backend.clone(),
        serde_json::to_value(definition)?,
        task_attributes(conn, job)?,
    );
    insert_task(conn, clock, &mut cancel_task)?;
    info!(job = %job.id, task = %cancel_task.id, "cancel task created");
    Ok(())
}

/// Build the agent-facing definition for a job.
pub fn job_to_definition(
    conn: &Connection,
    config: &ControllerConfig,
    job: &Job,
    task_id: &TaskId,
) -> Result<JobDefinition, ControllerError> {
    let mut args = job.action_args();
    if args.is_empty() {
        return Err(ControllerError::Internal(format!(
            "job {} has no run command",
            job.id
        )));
    }
    let image = args.remove(0);
    let full_image = format!("{}/{}", config.docker_registry, image);

    let mut env = std::collections::BTreeMap::new();
    env.insert("GANTRY_BACKEND".to_string(), job.backend.clone());

    // Reusable actions pull their code from the action repo; everything
    // else from the study repo. Both overrides are set together or not at
    // all.
    let study = Study {
        git_repo_url: job
            .action_repo_url
            .clone()
            .unwrap_or_else(|| job.repo_url.clone()),
        commit: job.action_commit.clone().unwrap_or_else(|| job.commit.clone()),
    };

    let mut input_job_ids = Vec::new();
    if !job.requires_outputs_from.is_empty() {
        let workspace_state = calculate_workspace_state(conn, &job.backend, &job.workspace)?;
        for action in &job.requires_outputs_from {
            // Absent means the action has never been run
            if let Some(previous) = workspace_state.iter().find(|j| &j.action == action) {
                input_job_ids.push(previous.id.clone());
            }
        }
    }

    let mut output_spec = std::collections::BTreeMap::new();
    for (privacy_level, named_patterns) in &job.output_spec {
        for pattern in named_patterns.values() {
            output_spec.insert(pattern.clone(), privacy_level.clone());
        }
    }

    Ok(JobDefinition {
        id: job.id.clone(),
        rap_id: job.rap_id.clone(),
        task_id: task_id.clone(),
        study,
        workspace: job.workspace.clone(),
        action: job.action.clone(),
        created_at: job.created_at,
        image: full_image,
        image_sha: None,
        args,
        env,
        inputs: vec![],
        input_job_ids,
        output_spec,
        allow_database_access: job.requires_db,
        database_name: if job.requires_db {
            job.database_name.clone()
        } else {
            None
        },
        cpu_count: config.cpu_count_for(&job.backend),
        memory_limit: config.memory_limit_for(&job.backend),
        level4_max_filesize: config.level4_max_filesize,
        level4_max_csv_rows: config.level4_max_csv_rows,
        level4_file_types: config.level4_file_types.clone(),
    })
}

/// Tracing attributes forwarded to the agent with each task.
pub fn task_attributes(
    conn: &Connection,
    job: &Job,
) -> Result<HashMap<String, String>, ControllerError> {
    let request = get_saved_rap_request(conn, &job.rap_id)?;
    let field = |key: &str| -> String {
        request
            .as_ref()
            .and_then(|r| r.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    let orgs = request
        .as_ref()
        .and_then(|r| r.get("orgs"))
        .and_then(|v| v.as_array())
        .map(|orgs| {
            orgs.iter()
                .filter_map(|o| o.as_str())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    Ok(HashMap::from([
        ("user".to_string(), field("created_by")),
        ("project".to_string(), field("project")),
        ("orgs".to_string(), orgs),
    ]))
}

/// Apply an agent update to a task.
///
/// The whole update is one transaction: stage, results, completion and the
/// active flip become visible atomically. DBSTATUS results additionally
/// commit the backend's `mode` flag in the same transaction, so no tick
/// ever observes one without the other.
pub fn handle_task_update<C: Clock>(
    db: &Database,
    clock: &C,
    update_payload: &TaskUpdate,
) -> Result<(), ControllerError> {
    db.transaction::<_, ControllerError>(|conn| {
        let mut task = get_task(conn, &update_payload.task_id)?;
        task.agent_stage = Some(update_payload.stage.clone());
        task.agent_results = update_payload.results.clone();
        task.agent_complete = update_payload.complete;
        if let Some(timestamp_ns) = update_payload.timestamp_ns {
            task.agent_timestamp_ns = Some(timestamp_ns);
        }
        if update_payload.complete {
            task.active = false;
            task.finished_at = Some(clock.epoch_s());
        }

        if task.kind == TaskType::DbStatus {
            apply_db_status(conn, clock, &task)?;
        }

        update(conn, &task, &[])?;
        Ok(())
    })
}

/// Commit the maintenance mode reported by a DBSTATUS probe.
fn apply_db_status<C: Clock>(
    conn: &Connection,
    clock: &C,
    task: &Task,
) -> Result<(), StorageError> {
    let Some(results) = &task.agent_results else {
        return Ok(());
    };
    let parsed: SimpleTaskResults = match serde_json::from_value(results.clone()) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(()),
    };
    let Some(inner) = parsed.results else {
        return Ok(());
    };
    if let Some(status) = inner.get("status").and_then(|v| v.as_str()) {
        let value = if status.is_empty() {
            None
        } else {
            Some(status.to_string())
        };
        set_flag(conn, flag::names::MODE, value, &task.backend, clock.epoch_s())?;
        info!(backend = %task.backend, status, "database maintenance status updated");
    }
    Ok(())
}

#[cfg(test)]
#[path = "task_api_tests.rs"]
mod tests;
