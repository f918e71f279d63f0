// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent-facing task RPC.

use crate::task_api::{get_active_tasks, handle_task_update};
use crate::web::auth::{require_backend_auth, ApiError};
use crate::web::AppState;
use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use gantry_core::{flag, AgentTask, Clock, SystemClock, TaskUpdate};
use gantry_storage::queries::set_flag;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

#[derive(Debug, Serialize)]
struct TasksResponse {
    tasks: Vec<AgentTask>,
}

/// `GET /{backend}/tasks/` — the active tasks for a backend.
///
/// Fetching also stamps the backend's `last-seen-at` flag, which is how
/// operators know an agent is alive.
pub async fn active_tasks(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_backend_auth(&state, &headers, &backend)?;
    let clock = SystemClock;

    let tasks = state
        .db
        .with(|conn| {
            let tasks = get_active_tasks(conn, &backend)?;
            let now = clock.epoch_s();
            let last_seen = chrono::DateTime::from_timestamp(now, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            set_flag(conn, flag::names::LAST_SEEN_AT, Some(last_seen), &backend, now)?;
            Ok(tasks)
        })
        .map_err(|err| {
            error!(backend = %backend, error = %err, "failed to list active tasks");
            ApiError::server_error()
        })?;

    let tasks: Vec<AgentTask> = tasks.iter().map(AgentTask::from).collect();
    Ok(Json(json!(TasksResponse { tasks })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateForm {
    /// The task update, JSON-encoded in a form field
    payload: String,
}

/// `POST /{backend}/task/update/` — apply an agent-reported task update.
pub async fn update_task(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    headers: HeaderMap,
    Form(form): Form<UpdateForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_backend_auth(&state, &headers, &backend)?;

    let update: TaskUpdate = serde_json::from_str(&form.payload).map_err(|err| {
        error!(backend = %backend, error = %err, "malformed task update payload");
        update_error()
    })?;

    handle_task_update(&state.db, &SystemClock, &update).map_err(|err| {
        error!(backend = %backend, task = %update.task_id, error = %err, "error updating task");
        update_error()
    })?;

    Ok(Json(json!({"response": "Update successful"})))
}

fn update_error() -> ApiError {
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Error updating task",
        "Error updating task",
    )
}
