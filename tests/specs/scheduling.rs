// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capacity limits and fairness across workspaces.

use crate::prelude::*;
use gantry_core::test_support;
use gantry_core::{ActionSpec, ProjectDefinition, State, StatusCode};
use std::collections::BTreeMap;

/// A project of three independent actions (no dependencies).
fn flat_project() -> ProjectDefinition {
    let mut actions = BTreeMap::new();
    for name in ["count", "measure", "summarise"] {
        actions.insert(
            name.to_string(),
            ActionSpec {
                run: format!("python:v2 python analysis/{name}.py"),
                needs: vec![],
                outputs: BTreeMap::new(),
                is_database_action: false,
                repo_url: None,
                commit: None,
            },
        );
    }
    ProjectDefinition { actions }
}

#[tokio::test]
async fn capacity_is_shared_fairly_between_workspaces() {
    // Backend capacity is two. Two workspaces submit three jobs each; after
    // one tick each workspace has exactly one running job.
    let harness = Harness::new();
    harness
        .projects
        .add_project("https://github.com/permitted/flat", flat_project());

    for workspace in ["alpha", "beta"] {
        let mut request =
            test_support::create_request(&format!("rap-{workspace}"), &["count", "measure", "summarise"]);
        request.workspace = workspace.to_string();
        request.repo_url = "https://github.com/permitted/flat".to_string();
        harness.create(&request).await.unwrap();
        // Distinct creation times so naive age ordering would favour alpha
        harness.clock.advance(std::time::Duration::from_secs(2));
    }

    harness.controller_tick();

    let running_in = |workspace: &str| {
        harness
            .jobs()
            .iter()
            .filter(|job| job.workspace == workspace && job.state == State::Running)
            .count()
    };
    assert_eq!(running_in("alpha"), 1);
    assert_eq!(running_in("beta"), 1);

    let waiting = harness
        .jobs()
        .iter()
        .filter(|job| job.status_code == StatusCode::WaitingOnWorkers)
        .count();
    assert_eq!(waiting, 4);
}

#[tokio::test]
async fn freed_capacity_is_taken_up_on_later_ticks() {
    let harness = Harness::new();
    harness
        .projects
        .add_project("https://github.com/permitted/flat", flat_project());
    let mut request = test_support::create_request("rap-1", &["count", "measure", "summarise"]);
    request.repo_url = "https://github.com/permitted/flat".to_string();
    harness.create(&request).await.unwrap();

    harness.controller_tick();
    let running = harness
        .jobs()
        .iter()
        .filter(|job| job.state == State::Running)
        .count();
    assert_eq!(running, 2, "capacity is two");

    // Everything completes eventually, including the queued third job
    harness.run_to_completion().await;
    assert!(harness
        .jobs()
        .iter()
        .all(|job| job.state == State::Succeeded));
}

#[tokio::test]
async fn db_workers_are_capped_separately() {
    let mut config = gantry_controller::ControllerConfig::defaults_for(&["test"]);
    config.max_workers.insert("test".to_string(), 10.0);
    config.max_db_workers.insert("test".to_string(), 1);
    let harness = Harness::with_config(config);

    // Two independent db actions
    let mut actions = BTreeMap::new();
    for name in ["extract-a", "extract-b"] {
        actions.insert(
            name.to_string(),
            ActionSpec {
                run: format!("ehrql:v1 generate-dataset analysis/{name}.py"),
                needs: vec![],
                outputs: BTreeMap::new(),
                is_database_action: true,
                repo_url: None,
                commit: None,
            },
        );
    }
    harness.projects.add_project(
        "https://github.com/permitted/db",
        ProjectDefinition { actions },
    );

    let mut request = test_support::create_request("rap-1", &["extract-a", "extract-b"]);
    request.repo_url = "https://github.com/permitted/db".to_string();
    harness.create(&request).await.unwrap();

    harness.controller_tick();
    let states: Vec<StatusCode> = harness.jobs().iter().map(|j| j.status_code).collect();
    assert!(states.contains(&StatusCode::Initiated));
    assert!(states.contains(&StatusCode::WaitingOnDbWorkers));
}
