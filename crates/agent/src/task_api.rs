// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent's client for the controller task RPC.

use crate::config::AgentConfig;
use async_trait::async_trait;
use gantry_core::{AgentTask, TaskId, TaskUpdate};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskApiError {
    /// Transport-level failure; retried on the next tick.
    #[error("task api request failed: {0}")]
    Transport(String),
    /// The controller answered with an error status.
    #[error("task api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("task api returned invalid JSON: {0}")]
    Decode(String),
}

/// The operations the agent needs from the controller.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Active tasks for this agent's backend.
    async fn get_active_tasks(&self) -> Result<Vec<AgentTask>, TaskApiError>;

    /// Report the current state of a task.
    ///
    /// `stage` is the agent's view of the task stage, `results` the
    /// (redacted) outcome so far, `complete` whether the agent is done with
    /// the task, `timestamp_ns` the agent-measured time of the change.
    async fn update_controller(
        &self,
        task: &AgentTask,
        stage: &str,
        results: Option<serde_json::Value>,
        complete: bool,
        timestamp_ns: Option<i64>,
    ) -> Result<(), TaskApiError>;
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    tasks: Vec<AgentTask>,
}

/// HTTP implementation speaking to the controller's axum surface.
pub struct HttpTaskApi {
    client: reqwest::Client,
    endpoint: String,
    backend: String,
    token: String,
}

impl HttpTaskApi {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.task_api_endpoint.trim_end_matches('/').to_string(),
            backend: config.backend.clone(),
            token: config.task_api_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.backend, path)
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn get_active_tasks(&self) -> Result<Vec<AgentTask>, TaskApiError> {
        let response = self
            .client
            .get(self.url("tasks/"))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|err| TaskApiError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaskApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: TasksResponse = response
            .json()
            .await
            .map_err(|err| TaskApiError::Decode(err.to_string()))?;
        Ok(parsed.tasks)
    }

    async fn update_controller(
        &self,
        task: &AgentTask,
        stage: &str,
        results: Option<serde_json::Value>,
        complete: bool,
        timestamp_ns: Option<i64>,
    ) -> Result<(), TaskApiError> {
        let update = TaskUpdate {
            task_id: task.id.clone(),
            stage: stage.to_string(),
            results,
            complete,
            timestamp_ns,
        };
        let payload = serde_json::to_string(&update)
            .map_err(|err| TaskApiError::Decode(err.to_string()))?;
        let response = self
            .client
            .post(self.url("task/update/"))
            .header("Authorization", format!("Bearer {}", self.token))
            .form(&[("payload", payload)])
            .send()
            .await
            .map_err(|err| TaskApiError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaskApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// A recorded update, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    pub task_id: TaskId,
    pub stage: String,
    pub results: Option<serde_json::Value>,
    pub complete: bool,
    pub timestamp_ns: Option<i64>,
}

/// In-memory [`TaskApi`] for tests: serves scripted tasks and records every
/// update posted.
#[derive(Default, Clone)]
pub struct RecordingTaskApi {
    tasks: Arc<Mutex<Vec<AgentTask>>>,
    updates: Arc<Mutex<Vec<RecordedUpdate>>>,
}

impl RecordingTaskApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tasks(&self, tasks: Vec<AgentTask>) {
        *self.tasks.lock() = tasks;
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().clone()
    }

    pub fn updates_for(&self, task_id: &TaskId) -> Vec<RecordedUpdate> {
        self.updates
            .lock()
            .iter()
            .filter(|update| &update.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn stages_for(&self, task_id: &TaskId) -> Vec<String> {
        self.updates_for(task_id)
            .into_iter()
            .map(|update| update.stage)
            .collect()
    }
}

#[async_trait]
impl TaskApi for RecordingTaskApi {
    async fn get_active_tasks(&self) -> Result<Vec<AgentTask>, TaskApiError> {
        Ok(self.tasks.lock().clone())
    }

    async fn update_controller(
        &self,
        task: &AgentTask,
        stage: &str,
        results: Option<serde_json::Value>,
        complete: bool,
        timestamp_ns: Option<i64>,
    ) -> Result<(), TaskApiError> {
        self.updates.lock().push(RecordedUpdate {
            task_id: task.id.clone(),
            stage: stage.to_string(),
            results,
            complete,
            timestamp_ns,
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "task_api_tests.rs"]
mod tests;
