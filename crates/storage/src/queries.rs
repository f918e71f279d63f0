// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain queries shared by the controller's loop and its HTTP surface.

use crate::db::StorageError;
use crate::record::{find_one, find_where, upsert, Filter};
use gantry_core::{Flag, Job, SavedRapRequest};
use rusqlite::Connection;

/// The most recent uncancelled job (if any) for each action in the
/// workspace.
///
/// Cancelled jobs are always ignored when considering the historical state
/// of the system.
pub fn calculate_workspace_state(
    conn: &Connection,
    backend: &str,
    workspace: &str,
) -> Result<Vec<Job>, StorageError> {
    let jobs: Vec<Job> = find_where(
        conn,
        &Filter::new()
            .eq("backend", backend)
            .eq("workspace", workspace)
            .eq("cancelled", false),
    )?;

    let mut latest: Vec<Job> = Vec::new();
    for job in jobs {
        match latest.iter_mut().find(|existing| existing.action == job.action) {
            // max_by created_at; on ties the later insert wins
            Some(existing) if existing.created_at <= job.created_at => *existing = job,
            Some(_) => {}
            None => latest.push(job),
        }
    }
    Ok(latest)
}

/// Get a flag row for a backend.
pub fn get_flag(conn: &Connection, name: &str, backend: &str) -> Result<Flag, StorageError> {
    find_one(conn, &Filter::new().eq("id", name).eq("backend", backend))
}

/// Current value of a flag, with graceful degradation.
///
/// Returns `None` when the flag was never set, and also when the flags
/// table itself does not exist yet (first-run bootstrap).
pub fn get_flag_value(
    conn: &Connection,
    name: &str,
    backend: &str,
) -> Result<Option<String>, StorageError> {
    match get_flag(conn, name, backend) {
        Ok(flag) => Ok(flag.value),
        Err(StorageError::NotFound { .. }) => Ok(None),
        Err(err) if err.is_missing_table() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Set a flag, preserving the timestamp when the value is unchanged.
pub fn set_flag(
    conn: &Connection,
    name: &str,
    value: Option<String>,
    backend: &str,
    now: i64,
) -> Result<Flag, StorageError> {
    if let Ok(current) = get_flag(conn, name, backend) {
        if current.value == value {
            return Ok(current);
        }
    }
    let flag = Flag::new(name, value, backend, now);
    upsert(conn, &flag)?;
    Ok(flag)
}

/// All flags currently set for a backend.
pub fn get_current_flags(conn: &Connection, backend: &str) -> Result<Vec<Flag>, StorageError> {
    find_where(conn, &Filter::new().eq("backend", backend))
}

/// The archived client request for a job's RAP, if still present.
pub fn get_saved_rap_request(
    conn: &Connection,
    rap_id: &str,
) -> Result<Option<serde_json::Value>, StorageError> {
    match find_one::<SavedRapRequest>(conn, &Filter::new().eq("id", rap_id)) {
        Ok(saved) => Ok(Some(saved.original)),
        Err(StorageError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
#[path = "queries_tests.rs"]
mod tests;
