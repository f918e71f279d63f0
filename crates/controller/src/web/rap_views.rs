// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The inbound client API: create, cancel and query RAPs, plus backend
//! status flags.

use crate::create_jobs::{
    create_jobs, jobs_for_rap, related_jobs_exist, set_cancelled_flag, CreateJobsError,
};
use crate::web::auth::{client_token_backends, ApiError};
use crate::web::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gantry_core::{flag, CreateRequest, Job, SystemClock};
use gantry_storage::queries::{get_current_flags, get_saved_rap_request};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

/// `POST /rap/create/` — run the DAG resolver for a request.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRequest>,
) -> Response {
    let token_backends = match client_token_backends(&state, &headers) {
        Ok(backends) => backends,
        Err(err) => return err.into_response(),
    };
    if !token_backends.contains(&request.backend) {
        return ApiError::new(
            StatusCode::FORBIDDEN,
            "Forbidden",
            format!("Not authorised for backend '{}'", request.backend),
        )
        .into_response();
    }

    // Idempotent resubmission: if jobs already exist for this RAP id the
    // request must match what we stored the first time.
    match related_jobs_exist(&state.db, &request.id) {
        Ok(true) => {
            let saved = state
                .db
                .with(|conn| get_saved_rap_request(conn, &request.id))
                .unwrap_or(None);
            if let Some(saved) = saved {
                if saved != request.original {
                    return ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "Bad request",
                        "Request data does not match the previously submitted request",
                    )
                    .into_response();
                }
            }
            let count = jobs_for_rap(&state.db, &request.id)
                .map(|jobs| jobs.len())
                .unwrap_or(0);
            return (
                StatusCode::OK,
                Json(json!({"result": "No change", "count": count})),
            )
                .into_response();
        }
        Ok(false) => {}
        Err(err) => {
            error!(rap_id = %request.id, error = %err, "create lookup failed");
            return ApiError::server_error().into_response();
        }
    }

    match create_jobs(
        &state.db,
        &state.config,
        state.projects.as_ref(),
        &state.tracer,
        &SystemClock,
        &request,
    )
    .await
    {
        Ok(count) => (
            StatusCode::CREATED,
            Json(json!({"result": "Success", "count": count})),
        )
            .into_response(),
        Err(CreateJobsError::NothingToDo(message)) => (
            StatusCode::OK,
            Json(json!({"result": message, "count": 0})),
        )
            .into_response(),
        Err(
            err @ (CreateJobsError::Validation(_)
            | CreateJobsError::StaleCodelists(_)
            | CreateJobsError::Project(_)),
        ) => {
            // These messages are safe to show the client
            ApiError::new(StatusCode::BAD_REQUEST, "Bad request", err.to_string())
                .into_response()
        }
        Err(err) => {
            error!(rap_id = %request.id, error = %err, "create failed");
            ApiError::server_error().into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub rap_id: String,
    pub actions: Vec<String>,
}

/// `POST /rap/cancel/` — flag jobs for one or more actions as cancelled.
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CancelRequest>,
) -> Response {
    let token_backends = match client_token_backends(&state, &headers) {
        Ok(backends) => backends,
        Err(err) => return err.into_response(),
    };

    let jobs = match jobs_for_rap(&state.db, &request.rap_id) {
        Ok(jobs) => jobs
            .into_iter()
            .filter(|job| token_backends.contains(&job.backend))
            .collect::<Vec<_>>(),
        Err(err) => {
            error!(rap_id = %request.rap_id, error = %err, "cancel lookup failed");
            return ApiError::server_error().into_response();
        }
    };
    if jobs.is_empty() {
        return ApiError::new(
            StatusCode::NOT_FOUND,
            "jobs not found",
            format!("No jobs found for rap_id {}", request.rap_id),
        )
        .into_response();
    }

    let known_actions: Vec<&String> = jobs.iter().map(|job| &job.action).collect();
    let missing: Vec<&String> = request
        .actions
        .iter()
        .filter(|action| !known_actions.contains(action))
        .collect();
    if !missing.is_empty() {
        let missing = missing
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",");
        return ApiError::new(
            StatusCode::NOT_FOUND,
            "jobs not found",
            format!("Jobs matching requested cancelled actions could not be found: {missing}"),
        )
        .into_response();
    }

    info!(rap_id = %request.rap_id, count = request.actions.len(), "cancelling actions");
    match set_cancelled_flag(&state.db, &SystemClock, &request.rap_id, &request.actions) {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({"result": "Success", "count": count})),
        )
            .into_response(),
        Err(err) => {
            error!(rap_id = %request.rap_id, error = %err, "cancel failed");
            ApiError::server_error().into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub rap_ids: Vec<String>,
}

/// A job as reported to clients.
#[derive(Debug, Serialize)]
pub struct JobStatusEntry {
    pub id: String,
    pub rap_id: String,
    pub backend: String,
    pub workspace: String,
    pub action: String,
    pub state: String,
    pub status_code: String,
    pub status_message: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl From<&Job> for JobStatusEntry {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            rap_id: job.rap_id.clone(),
            backend: job.backend.clone(),
            workspace: job.workspace.clone(),
            action: job.action.clone(),
            state: job.state.as_str().to_string(),
            status_code: job.status_code.as_str().to_string(),
            status_message: job.status_message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// `POST /rap/status/` — jobs for a set of RAP ids.
///
/// Unknown ids are reported in `unrecognised_rap_ids` rather than erroring,
/// so existence cannot be probed across token boundaries.
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StatusRequest>,
) -> Response {
    let token_backends = match client_token_backends(&state, &headers) {
        Ok(backends) => backends,
        Err(err) => return err.into_response(),
    };

    let mut jobs = Vec::new();
    let mut unrecognised = Vec::new();
    for rap_id in &request.rap_ids {
        let rap_jobs = match jobs_for_rap(&state.db, rap_id) {
            Ok(jobs) => jobs
                .into_iter()
                .filter(|job| token_backends.contains(&job.backend))
                .collect::<Vec<_>>(),
            Err(err) => {
                error!(rap_id = %rap_id, error = %err, "status lookup failed");
                return ApiError::server_error().into_response();
            }
        };
        if rap_jobs.is_empty() {
            unrecognised.push(rap_id.clone());
        } else {
            jobs.extend(rap_jobs.iter().map(JobStatusEntry::from));
        }
    }

    (
        StatusCode::OK,
        Json(json!({"jobs": jobs, "unrecognised_rap_ids": unrecognised})),
    )
        .into_response()
}

/// Status flags for one backend, shaped for the client API.
#[derive(Debug, Serialize)]
pub struct BackendFlags {
    pub slug: String,
    pub last_seen: Option<String>,
    pub paused: PauseFlags,
    pub db_maintenance: MaintenanceFlags,
}

#[derive(Debug, Serialize)]
pub struct PauseFlags {
    pub status: &'static str,
    pub since: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MaintenanceFlags {
    pub status: &'static str,
    pub since: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<&'static str>,
}

/// `GET /backend/status/` — flag summary for every backend the token can
/// see.
pub async fn backends_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token_backends = match client_token_backends(&state, &headers) {
        Ok(backends) => backends,
        Err(err) => return err.into_response(),
    };

    let mut backends = Vec::new();
    for backend in &token_backends {
        match state.db.with(|conn| get_current_flags(conn, backend)) {
            Ok(flags) => backends.push(flags_for_backend(backend, &flags)),
            Err(err) => {
                error!(backend = %backend, error = %err, "flag lookup failed");
                return ApiError::server_error().into_response();
            }
        }
    }
    (StatusCode::OK, Json(json!({"backends": backends}))).into_response()
}

fn iso(timestamp: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(timestamp, 0).map(|dt| dt.to_rfc3339())
}

fn flags_for_backend(backend: &str, flags: &[gantry_core::Flag]) -> BackendFlags {
    let find = |name: &str| flags.iter().find(|f| f.id == name);

    let mut summary = BackendFlags {
        slug: backend.to_string(),
        last_seen: None,
        paused: PauseFlags {
            status: "off",
            since: None,
        },
        db_maintenance: MaintenanceFlags {
            status: "off",
            since: None,
            kind: None,
        },
    };

    if let Some(last_seen) = find(flag::names::LAST_SEEN_AT) {
        summary.last_seen = last_seen.value.clone();
    }
    if let Some(paused) = find(flag::names::PAUSED) {
        summary.paused.since = iso(paused.timestamp);
        if paused.value.as_deref() == Some("true") {
            summary.paused.status = "on";
        }
    }
    if let Some(mode) = find(flag::names::MODE) {
        summary.db_maintenance.since = iso(mode.timestamp);
        if mode.value.as_deref() == Some(flag::MODE_DB_MAINTENANCE) {
            summary.db_maintenance.status = "on";
            let manual = find(flag::names::MANUAL_DB_MAINTENANCE)
                .is_some_and(|f| f.value.as_deref() == Some("on"));
            summary.db_maintenance.kind = Some(if manual { "manual" } else { "scheduled" });
        }
    }
    summary
}
