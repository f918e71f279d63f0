// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation semantics across the controller/agent boundary.

use crate::prelude::*;
use gantry_core::test_support;
use gantry_core::{State, StatusCode, Task, TaskType};
use gantry_executor::ExecutorState;
use gantry_storage::{find_where, Filter};

#[tokio::test]
async fn cancelling_a_job_mid_execution_drains_through_the_agent() {
    let harness = Harness::new();
    harness
        .create(&test_support::create_request("rap-1", &["generate"]))
        .await
        .unwrap();

    // Drive to EXECUTING
    harness.controller_tick();
    harness.agent_tick().await; // prepare
    harness.agent_tick().await; // execute
    let generate = harness.job("generate");
    assert_eq!(harness.executor.state_of(&generate.id), ExecutorState::Executing);

    harness.cancel_actions("rap-1", &["generate"]);

    // The controller reacts on its next tick: RUNJOB out, CANCELJOB in,
    // the job is not final yet
    harness.controller_tick();
    let tasks: Vec<Task> = harness
        .db
        .with(|conn| find_where(conn, &Filter::new()))
        .unwrap();
    let runjob = tasks.iter().find(|t| t.kind == TaskType::RunJob).unwrap();
    let cancel = tasks.iter().find(|t| t.kind == TaskType::CancelJob).unwrap();
    assert!(!runjob.active);
    assert!(cancel.active);
    assert_eq!(harness.job("generate").state, State::Running);

    // The agent terminates, finalizes with the cancel marker and cleans up
    harness.agent_tick().await;
    let calls = harness.executor.calls_for(&generate.id);
    assert!(calls.contains(&"terminate".to_string()));
    assert!(calls.contains(&"finalize(cancelled)".to_string()));
    assert_eq!(calls.last().unwrap(), "cleanup");

    // Once the agent confirms, the controller finalises the job
    harness.controller_tick();
    let generate = harness.job("generate");
    assert_state(&generate, State::Failed);
    assert_eq!(generate.status_code, StatusCode::CancelledByUser);
    assert_eq!(generate.status_message, "Cancelled by user");
}

#[tokio::test]
async fn cancelling_before_dispatch_never_reaches_the_agent() {
    let harness = Harness::new();
    harness
        .create(&test_support::create_request("rap-1", &["generate"]))
        .await
        .unwrap();

    harness.cancel_actions("rap-1", &["generate"]);
    harness.controller_tick();

    let generate = harness.job("generate");
    assert_eq!(generate.status_code, StatusCode::CancelledByUser);
    let tasks: Vec<Task> = harness
        .db
        .with(|conn| find_where(conn, &Filter::new()))
        .unwrap();
    assert!(tasks.is_empty());
    assert!(harness.executor.calls().is_empty());
}

#[tokio::test]
async fn cancelled_jobs_are_ignored_by_later_requests() {
    let harness = Harness::new();
    harness
        .create(&test_support::create_request("rap-1", &["generate"]))
        .await
        .unwrap();
    harness.cancel_actions("rap-1", &["generate"]);
    harness.controller_tick();

    // The action can be requested again immediately: the cancelled job does
    // not count as workspace state
    let count = harness
        .create(&test_support::create_request("rap-2", &["generate"]))
        .await
        .unwrap();
    assert_eq!(count, 1);
}
