// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Task record: one unit of work handed to an agent.

use crate::id::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of work a task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Run a job on the backend
    #[serde(rename = "runjob")]
    RunJob,
    /// Cancel a previously dispatched RUNJOB task
    #[serde(rename = "canceljob")]
    CancelJob,
    /// Probe the backend database for maintenance mode
    #[serde(rename = "dbstatus")]
    DbStatus,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::RunJob => "runjob",
            TaskType::CancelJob => "canceljob",
            TaskType::DbStatus => "dbstatus",
        }
    }

    pub fn from_value(value: &str) -> Option<TaskType> {
        match value {
            "runjob" => Some(TaskType::RunJob),
            "canceljob" => Some(TaskType::CancelJob),
            "dbstatus" => Some(TaskType::DbStatus),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A task row, co-owned by controller and agent.
///
/// The controller writes creation/activation and consumes the agent fields;
/// the agent (via the task RPC) writes only the `agent_*` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub backend: String,
    #[serde(rename = "type")]
    pub kind: TaskType,
    /// Opaque payload the agent consumes (a JobDefinition for RUNJOB and
    /// CANCELJOB, a database name for DBSTATUS)
    pub definition: serde_json::Value,
    pub active: bool,
    // Timestamps from the controller's point of view, second resolution
    pub created_at: Option<i64>,
    pub finished_at: Option<i64>,
    /// Key-value pairs forwarded to the agent for tracing purposes
    pub attributes: HashMap<String, String>,
    /// Stage reported by the agent (mirrors executor states)
    pub agent_stage: Option<String>,
    /// The task is complete from the agent's point of view once set
    pub agent_complete: bool,
    /// Results of the task, including any error information
    pub agent_results: Option<serde_json::Value>,
    /// Timestamp of the state change as measured on the agent, nanoseconds
    pub agent_timestamp_ns: Option<i64>,
}

impl Task {
    pub fn new(
        id: TaskId,
        kind: TaskType,
        backend: impl Into<String>,
        definition: serde_json::Value,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            id,
            backend: backend.into(),
            kind,
            definition,
            active: true,
            created_at: None,
            finished_at: None,
            attributes,
            agent_stage: None,
            agent_complete: false,
            agent_results: None,
            agent_timestamp_ns: None,
        }
    }
}

/// The agent-visible view of a task.
///
/// This is all the information the controller supplies and is effectively
/// immutable; the agent's view of a task's current state is computed on
/// demand from the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub backend: String,
    #[serde(rename = "type")]
    pub kind: TaskType,
    pub definition: serde_json::Value,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl From<&Task> for AgentTask {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            backend: task.backend.clone(),
            kind: task.kind,
            definition: task.definition.clone(),
            attributes: task.attributes.clone(),
            created_at: task.created_at,
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
