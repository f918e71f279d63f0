// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::api::{ExecutorApi, ExecutorError, ExecutorState, JobResults};
use gantry_core::test_support;
use gantry_core::TaskId;

fn definition() -> gantry_core::JobDefinition {
    let job = test_support::job("rap-1", "generate");
    test_support::job_definition(&job, &TaskId::new("t-001"))
}

#[tokio::test]
async fn happy_path_walks_the_pipeline() {
    let fake = FakeExecutor::new();
    let job = definition();

    let status = fake.get_status(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Unknown);

    let status = fake.prepare(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Prepared);

    let status = fake.execute(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Executing);

    fake.finish_execution(&job.id);
    assert_eq!(fake.state_of(&job.id), ExecutorState::Executed);

    let status = fake.finalize(&job, false, None).await.unwrap();
    assert_eq!(status.state, ExecutorState::Finalized);
    assert!(status.results.is_some());

    let status = fake.cleanup(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Unknown);
}

#[tokio::test]
async fn prepare_is_idempotent() {
    let fake = FakeExecutor::new();
    let job = definition();
    fake.prepare(&job).await.unwrap();
    fake.execute(&job).await.unwrap();
    // A second prepare must not reset a running job
    let status = fake.prepare(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Executing);
}

#[tokio::test]
async fn scripted_results_are_returned_on_finalize() {
    let fake = FakeExecutor::new();
    let job = definition();
    fake.script_results(
        &job.id,
        JobResults {
            exit_code: Some(3),
            image_id: "sha256:beef".to_string(),
            ..JobResults::default()
        },
    );
    fake.set_state(&job.id, ExecutorState::Executed);
    fake.finalize(&job, false, None).await.unwrap();
    let results = fake.get_results(&job).await.unwrap();
    assert_eq!(results.exit_code, Some(3));
    assert_eq!(results.image_id, "sha256:beef");
}

#[tokio::test]
async fn get_results_requires_finalized() {
    let fake = FakeExecutor::new();
    let job = definition();
    assert!(matches!(
        fake.get_results(&job).await,
        Err(ExecutorError::Error(_))
    ));
}

#[tokio::test]
async fn pushed_retry_surfaces_once() {
    let fake = FakeExecutor::new();
    let job = definition();
    fake.push_retry(&job.id);
    assert!(matches!(
        fake.get_status(&job).await,
        Err(ExecutorError::Retry(_))
    ));
    assert!(fake.get_status(&job).await.is_ok());
}

#[tokio::test]
async fn terminate_moves_executing_to_executed() {
    let fake = FakeExecutor::new();
    let job = definition();
    fake.set_state(&job.id, ExecutorState::Executing);
    let status = fake.terminate(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Executed);
}

#[tokio::test]
async fn auto_mode_completes_execution_immediately() {
    let fake = FakeExecutor::auto();
    let job = definition();
    fake.prepare(&job).await.unwrap();
    let status = fake.execute(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Executed);
}

#[tokio::test]
async fn calls_are_recorded_in_order() {
    let fake = FakeExecutor::new();
    let job = definition();
    fake.prepare(&job).await.unwrap();
    fake.execute(&job).await.unwrap();
    fake.finish_execution(&job.id);
    fake.finalize(&job, false, None).await.unwrap();
    fake.cleanup(&job).await.unwrap();
    assert_eq!(
        fake.calls_for(&job.id),
        vec!["prepare", "execute", "finalize", "cleanup"]
    );
}

#[tokio::test]
async fn finalize_with_error_persists_the_record() {
    let fake = FakeExecutor::new();
    let job = definition();
    let error = gantry_core::TaskErrorRecord {
        exception: "ExecutorError".to_string(),
        message: "volume vanished".to_string(),
        traceback: String::new(),
    };
    fake.finalize(&job, false, Some(&error)).await.unwrap();
    let status = fake.get_status(&job).await.unwrap();
    assert_eq!(status.state, ExecutorState::Finalized);
    assert_eq!(status.message.as_deref(), Some("volume vanished"));
}

#[tokio::test]
async fn timestamps_strictly_increase() {
    let fake = FakeExecutor::new();
    let job = definition();
    let a = fake.get_status(&job).await.unwrap().timestamp_ns;
    let b = fake.get_status(&job).await.unwrap().timestamp_ns;
    assert!(b > a);
}
