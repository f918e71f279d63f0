// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Database maintenance windows: DBSTATUS probes, the mode flag, and db-job
//! preemption.

use crate::prelude::*;
use gantry_core::test_support;
use gantry_core::{Clock, State, StatusCode, Task, TaskType};
use gantry_storage::{find_where, Filter};
use std::time::Duration;

fn maintenance_harness() -> Harness {
    let mut config = gantry_controller::ControllerConfig::defaults_for(&["test"]);
    config.maintenance_enabled_backends = vec!["test".to_string()];
    Harness::with_config(config)
}

fn dbstatus_tasks(harness: &Harness) -> Vec<Task> {
    harness
        .db
        .with(|conn| {
            find_where(
                conn,
                &Filter::new().eq("type", TaskType::DbStatus.as_str()),
            )
        })
        .unwrap()
}

#[tokio::test]
async fn a_maintenance_window_preempts_db_jobs_and_releases_them() {
    let harness = maintenance_harness();
    harness
        .create(&test_support::create_request("rap-1", &["generate"]))
        .await
        .unwrap();

    // The generate job is a db job; get it running. The first scheduled
    // probe goes out on the same tick and reports normal operation.
    harness.controller_tick();
    harness.agent_tick().await; // probe ok + prepare
    harness.agent_tick().await; // execute
    let generate = harness.job("generate");
    assert_eq!(
        harness.executor.state_of(&generate.id),
        gantry_executor::ExecutorState::Executing
    );

    // Past the poll interval a fresh probe goes out, and this one reports
    // maintenance
    harness
        .clock
        .advance(harness.config.maintenance_poll_interval + Duration::from_secs(1));
    harness.controller_tick();
    harness.probe.push_status("db-maintenance");
    harness.agent_tick().await;
    assert_eq!(harness.flag("mode").as_deref(), Some("db-maintenance"));
    // The probe task row and the flag were committed together
    let probes = dbstatus_tasks(&harness);
    assert_eq!(probes.len(), 2);
    assert!(probes.iter().all(|p| !p.active));

    // Next controller tick: the running db job is cancelled and parked
    harness.controller_tick();
    let generate = harness.job("generate");
    assert_state(&generate, State::Pending);
    assert_eq!(generate.status_code, StatusCode::WaitingDbMaintenance);

    // The agent drains the cancel
    harness.agent_tick().await;

    // After the next window the probe reports normal operation again; the
    // DBSTATUS-first ordering means the flag clears before any job task is
    // reconsidered
    harness
        .clock
        .advance(harness.config.maintenance_poll_interval + Duration::from_secs(1));
    harness.controller_tick();
    harness.probe.push_status("");
    harness.agent_tick().await;
    assert_eq!(harness.flag("mode"), None);

    // With the flag cleared the job is rescheduled on a fresh task
    harness.controller_tick();
    let generate = harness.job("generate");
    assert_eq!(generate.status_code, StatusCode::Initiated);
    let runjobs: Vec<Task> = harness
        .db
        .with(|conn| {
            find_where(conn, &Filter::new().eq("type", TaskType::RunJob.as_str()))
        })
        .unwrap();
    assert_eq!(runjobs.len(), 2, "a new RUNJOB task was created");
}

#[tokio::test]
async fn pending_db_jobs_wait_while_maintenance_is_on() {
    let harness = maintenance_harness();
    harness
        .db
        .with(|conn| {
            gantry_storage::queries::set_flag(
                conn,
                "mode",
                Some("db-maintenance".to_string()),
                "test",
                harness.clock.epoch_s(),
            )
        })
        .unwrap();
    harness
        .create(&test_support::create_request("rap-1", &["analyse"]))
        .await
        .unwrap();

    harness.controller_tick();
    assert_eq!(
        harness.job("generate").status_code,
        StatusCode::WaitingDbMaintenance
    );
    // Non-db jobs are not affected by maintenance, they wait on their
    // dependencies as usual
    assert_eq!(
        harness.job("prepare").status_code,
        StatusCode::WaitingOnDependencies
    );
}

#[tokio::test]
async fn probes_are_scheduled_per_poll_interval() {
    let harness = maintenance_harness();

    harness.controller_tick();
    assert_eq!(dbstatus_tasks(&harness).len(), 1);

    // Still within the interval: no new probe even after completion
    harness.agent_tick().await;
    harness.controller_tick();
    assert_eq!(dbstatus_tasks(&harness).len(), 1);

    harness
        .clock
        .advance(harness.config.maintenance_poll_interval + Duration::from_secs(1));
    harness.controller_tick();
    assert_eq!(dbstatus_tasks(&harness).len(), 2);
}
