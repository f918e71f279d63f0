// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled DBSTATUS probes for maintenance-enabled backends.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::task_api::insert_task;
use gantry_core::{flag, Clock, Task, TaskId, TaskType};
use gantry_storage::queries::get_flag_value;
use gantry_storage::{exists_where, update_where, Database, Filter};
use rusqlite::types::Value;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Keep the periodic DBSTATUS task schedule up to date.
///
/// Currently the only scheduled task kind.
pub fn update_scheduled_tasks<C: Clock>(
    db: &Database,
    config: &ControllerConfig,
    clock: &C,
) -> Result<(), ControllerError> {
    for backend in &config.maintenance_enabled_backends {
        update_db_maintenance_task(db, config, clock, backend)?;
    }
    Ok(())
}

fn update_db_maintenance_task<C: Clock>(
    db: &Database,
    config: &ControllerConfig,
    clock: &C,
    backend: &str,
) -> Result<(), ControllerError> {
    // Manual maintenance mode is authoritative: deactivate any probes and
    // leave the mode flag alone until an operator turns it off. The probes
    // keep a NULL finished_at so they never count as a recent result: once
    // manual mode ends, a fresh probe goes out on the next tick rather
    // than after the poll interval.
    let manual = db.with(|conn| {
        get_flag_value(conn, flag::names::MANUAL_DB_MAINTENANCE, backend)
    })?;
    if manual.is_some() {
        let deactivated = db.with(|conn| {
            update_where::<Task>(
                conn,
                &[("active", Value::from(false))],
                &Filter::new()
                    .eq("type", TaskType::DbStatus.as_str())
                    .eq("backend", backend)
                    .eq("active", true),
            )
        })?;
        if deactivated > 0 {
            info!(backend, "manual db maintenance on, deactivated status probes");
        }
        return Ok(());
    }

    // One probe in flight at a time
    let has_active = db.with(|conn| {
        exists_where::<Task>(
            conn,
            &Filter::new()
                .eq("type", TaskType::DbStatus.as_str())
                .eq("backend", backend)
                .eq("active", true),
        )
    })?;
    if has_active {
        return Ok(());
    }

    // Nothing to do while a recent probe result is still fresh
    let cutoff = clock.epoch_s() - config.maintenance_poll_interval.as_secs() as i64;
    let has_recent = db.with(|conn| {
        exists_where::<Task>(
            conn,
            &Filter::new()
                .eq("type", TaskType::DbStatus.as_str())
                .eq("backend", backend)
                .eq("active", false)
                .gt("finished_at", cutoff),
        )
    })?;
    if has_recent {
        return Ok(());
    }

    // The structured id is not strictly necessary but helps debugging
    let date = chrono::DateTime::from_timestamp(clock.epoch_s(), 0)
        .map(|dt| dt.date_naive().to_string())
        .unwrap_or_default();
    let task_id = TaskId::new(format!(
        "dbstatus-{}-{}",
        date,
        Uuid::new_v4().simple()
    ));
    let mut task = Task::new(
        task_id,
        TaskType::DbStatus,
        backend,
        json!({"database_name": "default"}),
        Default::default(),
    );
    db.with(|conn| Ok(insert_task(conn, clock, &mut task)))??;
    info!(backend, task = %task.id, "scheduled db status probe");
    Ok(())
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
