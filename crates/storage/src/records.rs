// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`Record`] implementations for the domain types.
//!
//! JSON encoding of list/map fields happens here and only here; everything
//! above this layer works with the typed structs.

use crate::db::StorageError;
use crate::record::Record;
use gantry_core::{Flag, Job, JobId, SavedRapRequest, State, StatusCode, Task, TaskId, TaskType};
use rusqlite::types::Value;
use rusqlite::Row;

fn json_text<T: serde::Serialize>(value: &T) -> Result<Value, StorageError> {
    Ok(Value::Text(serde_json::to_string(value)?))
}

fn opt_json_text<T: serde::Serialize>(value: &Option<T>) -> Result<Value, StorageError> {
    match value {
        Some(v) => json_text(v),
        None => Ok(Value::Null),
    }
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(v) => Value::Text(v.clone()),
        None => Value::Null,
    }
}

fn opt_int(value: Option<i64>) -> Value {
    match value {
        Some(v) => Value::Integer(v),
        None => Value::Null,
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    text: Option<String>,
) -> Result<Option<T>, StorageError> {
    match text {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

impl Record for Job {
    const TABLE: &'static str = "job";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "rap_id",
        "backend",
        "workspace",
        "action",
        "state",
        "status_code",
        "status_message",
        "status_code_updated_at",
        "repo_url",
        "commit",
        "database_name",
        "requires_db",
        "run_command",
        "requires_outputs_from",
        "wait_for_job_ids",
        "output_spec",
        "cancelled",
        "created_at",
        "updated_at",
        "started_at",
        "completed_at",
        "trace_context",
        "analysis_scope",
        "action_repo_url",
        "action_commit",
    ];

    fn values(&self) -> Result<Vec<Value>, StorageError> {
        Ok(vec![
            Value::Text(self.id.to_string()),
            Value::Text(self.rap_id.clone()),
            Value::Text(self.backend.clone()),
            Value::Text(self.workspace.clone()),
            Value::Text(self.action.clone()),
            Value::Text(self.state.as_str().to_string()),
            Value::Text(self.status_code.as_str().to_string()),
            Value::Text(self.status_message.clone()),
            Value::Integer(self.status_code_updated_at),
            Value::Text(self.repo_url.clone()),
            Value::Text(self.commit.clone()),
            opt_text(&self.database_name),
            Value::from(self.requires_db),
            Value::Text(self.run_command.clone()),
            json_text(&self.requires_outputs_from)?,
            json_text(&self.wait_for_job_ids)?,
            json_text(&self.output_spec)?,
            Value::from(self.cancelled),
            Value::Integer(self.created_at),
            Value::Integer(self.updated_at),
            opt_int(self.started_at),
            opt_int(self.completed_at),
            json_text(&self.trace_context)?,
            opt_json_text(&self.analysis_scope)?,
            opt_text(&self.action_repo_url),
            opt_text(&self.action_commit),
        ])
    }

    fn from_row(row: &Row<'_>) -> Result<Self, StorageError> {
        let state_text: String = row.get(5)?;
        let state = State::from_value(&state_text).ok_or(StorageError::Decode {
            column: "state",
            value: state_text.clone(),
        })?;
        let code_text: String = row.get(6)?;
        let status_code = StatusCode::parse(&code_text).ok_or(StorageError::Decode {
            column: "status_code",
            value: code_text.clone(),
        })?;
        Ok(Job {
            id: JobId::new(row.get::<_, String>(0)?),
            rap_id: row.get(1)?,
            backend: row.get(2)?,
            workspace: row.get(3)?,
            action: row.get(4)?,
            state,
            status_code,
            status_message: row.get(7)?,
            status_code_updated_at: row.get(8)?,
            repo_url: row.get(9)?,
            commit: row.get(10)?,
            database_name: row.get(11)?,
            requires_db: row.get(12)?,
            run_command: row.get(13)?,
            requires_outputs_from: parse_json(row.get(14)?)?.unwrap_or_default(),
            wait_for_job_ids: parse_json(row.get(15)?)?.unwrap_or_default(),
            output_spec: parse_json(row.get(16)?)?.unwrap_or_default(),
            cancelled: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
            started_at: row.get(20)?,
            completed_at: row.get(21)?,
            trace_context: parse_json(row.get(22)?)?.unwrap_or_default(),
            analysis_scope: parse_json(row.get(23)?)?,
            action_repo_url: row.get(24)?,
            action_commit: row.get(25)?,
        })
    }
}

impl Record for Task {
    const TABLE: &'static str = "tasks";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "backend",
        "type",
        "definition",
        "active",
        "created_at",
        "finished_at",
        "attributes",
        "agent_stage",
        "agent_complete",
        "agent_results",
        "agent_timestamp_ns",
    ];

    fn values(&self) -> Result<Vec<Value>, StorageError> {
        Ok(vec![
            Value::Text(self.id.to_string()),
            Value::Text(self.backend.clone()),
            Value::Text(self.kind.as_str().to_string()),
            json_text(&self.definition)?,
            Value::from(self.active),
            opt_int(self.created_at),
            opt_int(self.finished_at),
            json_text(&self.attributes)?,
            opt_text(&self.agent_stage),
            Value::from(self.agent_complete),
            opt_json_text(&self.agent_results)?,
            opt_int(self.agent_timestamp_ns),
        ])
    }

    fn from_row(row: &Row<'_>) -> Result<Self, StorageError> {
        let kind_text: String = row.get(2)?;
        let kind = TaskType::from_value(&kind_text).ok_or(StorageError::Decode {
            column: "type",
            value: kind_text.clone(),
        })?;
        Ok(Task {
            id: TaskId::new(row.get::<_, String>(0)?),
            backend: row.get(1)?,
            kind,
            definition: parse_json(row.get(3)?)?.unwrap_or(serde_json::Value::Null),
            active: row.get(4)?,
            created_at: row.get(5)?,
            finished_at: row.get(6)?,
            attributes: parse_json(row.get(7)?)?.unwrap_or_default(),
            agent_stage: row.get(8)?,
            agent_complete: row.get(9)?,
            agent_results: parse_json(row.get(10)?)?,
            agent_timestamp_ns: row.get(11)?,
        })
    }
}

impl Record for Flag {
    const TABLE: &'static str = "flags";
    const COLUMNS: &'static [&'static str] = &["id", "backend", "value", "timestamp"];
    const KEY: &'static [&'static str] = &["id", "backend"];

    fn values(&self) -> Result<Vec<Value>, StorageError> {
        Ok(vec![
            Value::Text(self.id.clone()),
            Value::Text(self.backend.clone()),
            opt_text(&self.value),
            Value::Integer(self.timestamp),
        ])
    }

    fn from_row(row: &Row<'_>) -> Result<Self, StorageError> {
        Ok(Flag {
            id: row.get(0)?,
            backend: row.get(1)?,
            value: row.get(2)?,
            timestamp: row.get(3)?,
        })
    }
}

impl Record for SavedRapRequest {
    const TABLE: &'static str = "rap_request";
    const COLUMNS: &'static [&'static str] = &["id", "original"];

    fn values(&self) -> Result<Vec<Value>, StorageError> {
        Ok(vec![
            Value::Text(self.id.clone()),
            json_text(&self.original)?,
        ])
    }

    fn from_row(row: &Row<'_>) -> Result<Self, StorageError> {
        Ok(SavedRapRequest {
            id: row.get(0)?,
            original: parse_json(row.get(1)?)?.unwrap_or(serde_json::Value::Null),
        })
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
