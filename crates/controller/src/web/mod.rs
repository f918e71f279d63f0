// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller's HTTP surface: the agent task RPC plus the inbound
//! client API.

mod auth;
mod rap_views;
mod task_views;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::job_tracing::JobTracer;
use crate::projects::ProjectSource;
use axum::routing::{get, post};
use axum::Router;
use gantry_storage::Database;
use std::sync::Arc;
use tracing::info;

pub use auth::ApiError;
pub use rap_views::{BackendFlags, CancelRequest, JobStatusEntry, StatusRequest};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<ControllerConfig>,
    pub projects: Arc<dyn ProjectSource>,
    pub tracer: Arc<JobTracer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{backend}/tasks/", get(task_views::active_tasks))
        .route("/{backend}/task/update/", post(task_views::update_task))
        .route("/rap/create/", post(rap_views::create))
        .route("/rap/cancel/", post(rap_views::cancel))
        .route("/rap/status/", post(rap_views::status))
        .route("/backend/status/", get(rap_views::backends_status))
        .with_state(state)
}

/// Serve the API until the process exits.
pub async fn serve(state: AppState, bind_address: &str) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|err| ControllerError::Internal(format!("cannot bind {bind_address}: {err}")))?;
    info!(address = bind_address, "task API listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|err| ControllerError::Internal(format!("http server failed: {err}")))
}
