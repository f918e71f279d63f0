// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gantry_core::test_support;
use gantry_storage::{ensure_db, insert, Database};
use serde_json::json;

fn db() -> Database {
    let db = Database::open_in_memory().unwrap();
    ensure_db(&db).unwrap();
    db
}

#[test]
fn initialise_writes_a_w3c_trace_context() {
    let tracer = JobTracer::new();
    let mut job = test_support::job("rap-1", "generate");
    tracer.initialise_job_trace(&mut job);

    let traceparent = job.trace_context.get("traceparent").unwrap();
    // Format: 00-<32 hex trace id>-<16 hex span id>-<flags>
    let parts: Vec<&str> = traceparent.split('-').collect();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0], "00");
    assert_eq!(parts[1].len(), 32);
    assert_eq!(parts[2].len(), 16);
}

#[test]
fn initialise_is_not_repeated() {
    let tracer = JobTracer::new();
    let mut job = test_support::job("rap-1", "generate");
    tracer.initialise_job_trace(&mut job);
    let first = job.trace_context.clone();
    tracer.initialise_job_trace(&mut job);
    assert_eq!(job.trace_context, first);
}

#[test]
fn trace_context_round_trips_to_a_valid_parent() {
    let tracer = JobTracer::new();
    let mut job = test_support::job("rap-1", "generate");
    tracer.initialise_job_trace(&mut job);
    assert!(tracer.parent_context(&job).is_some());
}

#[test]
fn jobs_without_context_are_not_traced() {
    let tracer = JobTracer::new();
    let job = test_support::job("rap-1", "generate");
    assert!(tracer.parent_context(&job).is_none());
}

#[test]
fn span_recording_tolerates_untraced_jobs() {
    let db = db();
    let tracer = JobTracer::new();
    let job = test_support::job("rap-1", "generate");
    // Must not error or panic; the job simply is not traced
    db.with(|conn| {
        tracer.finish_current_state(conn, &job, job.status_code_updated_at + 1, &SpanDetails::none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn attributes_include_saved_request_metadata() {
    let db = db();
    db.with(|conn| {
        insert(
            conn,
            &gantry_core::SavedRapRequest {
                id: "rap-1".to_string(),
                original: json!({
                    "created_by": "alice",
                    "project": "project-1",
                    "orgs": ["permitted", "other"],
                }),
            },
        )
    })
    .unwrap();

    let job = test_support::job("rap-1", "generate");
    let attributes = db
        .with(|conn| Ok(job_attributes(conn, &job, None)))
        .unwrap();
    let get = |key: &str| {
        attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    };
    assert_eq!(get("job.user").as_deref(), Some("alice"));
    assert_eq!(get("job.project").as_deref(), Some("project-1"));
    assert_eq!(get("job.orgs").as_deref(), Some("permitted,other"));
    assert_eq!(get("job.action").as_deref(), Some("generate"));
}

#[test]
fn attributes_default_unknown_without_saved_request() {
    let db = db();
    let job = test_support::job("rap-1", "generate");
    let attributes = db
        .with(|conn| Ok(job_attributes(conn, &job, None)))
        .unwrap();
    let user = attributes
        .iter()
        .find(|kv| kv.key.as_str() == "job.user")
        .unwrap();
    assert_eq!(user.value.to_string(), "unknown");
}

#[test]
fn result_attributes_are_added_when_present() {
    let db = db();
    let job = test_support::job("rap-1", "generate");
    let results = gantry_core::JobTaskResults {
        exit_code: Some(3),
        image_id: "sha256:beef".to_string(),
        message: Some("db fell over".to_string()),
        ..Default::default()
    };
    let attributes = db
        .with(|conn| Ok(job_attributes(conn, &job, Some(&results))))
        .unwrap();
    assert!(attributes.iter().any(|kv| kv.key.as_str() == "job.exit_code"));
    assert!(attributes
        .iter()
        .any(|kv| kv.key.as_str() == "job.executor_message"));
}
