// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

pub(crate) fn sample_definition() -> JobDefinition {
    JobDefinition {
        id: JobId::new("job1"),
        rap_id: "rap-1".to_string(),
        task_id: TaskId::new("job1-001"),
        study: Study {
            git_repo_url: "https://github.com/permitted/study".to_string(),
            commit: "abc123".to_string(),
        },
        workspace: "ws".to_string(),
        action: "generate".to_string(),
        created_at: 1_000_000_000,
        image: "registry.example.com/ehrql:v1".to_string(),
        image_sha: None,
        args: vec!["generate-dataset".to_string()],
        env: BTreeMap::from([("BACKEND".to_string(), "test".to_string())]),
        inputs: vec![],
        input_job_ids: vec![],
        output_spec: BTreeMap::from([(
            "output/dataset.csv".to_string(),
            "highly_sensitive".to_string(),
        )]),
        allow_database_access: true,
        database_name: Some("default".to_string()),
        cpu_count: 2.0,
        memory_limit: "4G".to_string(),
        level4_max_filesize: 16 * 1024 * 1024,
        level4_max_csv_rows: 5000,
        level4_file_types: vec![".csv".to_string()],
    }
}

#[test]
fn job_definition_round_trips_with_nested_study() {
    let definition = sample_definition();
    let value = serde_json::to_value(&definition).unwrap();
    assert_eq!(value["study"]["git_repo_url"], json!("https://github.com/permitted/study"));
    let back: JobDefinition = serde_json::from_value(value).unwrap();
    assert_eq!(back, definition);
}

#[test]
fn results_use_wire_field_names() {
    let results = JobTaskResults {
        exit_code: Some(0),
        image_id: "sha256:feed".to_string(),
        message: Some("done".to_string()),
        unmatched_hint: None,
        timestamp_ns: Some(123),
        ..JobTaskResults::default()
    };
    let value = serde_json::to_value(&results).unwrap();
    assert_eq!(value["docker_image_id"], json!("sha256:feed"));
    assert_eq!(value["status_message"], json!("done"));
    assert!(value.get("image_id").is_none());
    let back: JobTaskResults = serde_json::from_value(value).unwrap();
    assert_eq!(back, results);
}

#[test]
fn results_default_unknown_image_labels() {
    let results: JobTaskResults = serde_json::from_value(json!({
        "exit_code": 1,
        "docker_image_id": "sha256:beef",
    }))
    .unwrap();
    assert_eq!(results.action_version, "unknown");
    assert_eq!(results.base_revision, "unknown");
    assert!(!results.has_unmatched_patterns);
}

#[test]
fn results_payload_flattens_results() {
    let payload = TaskResultsPayload {
        error: None,
        results: Some(JobTaskResults {
            exit_code: Some(0),
            image_id: "sha256:feed".to_string(),
            ..JobTaskResults::default()
        }),
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["exit_code"], json!(0));
    assert!(value.get("results").is_none());
}

#[test]
fn results_payload_error_survives_round_trip() {
    let payload = TaskResultsPayload {
        error: Some(TaskErrorRecord {
            exception: "ExecutorError".to_string(),
            message: "boom".to_string(),
            traceback: String::new(),
        }),
        results: None,
    };
    let value = serde_json::to_value(&payload).unwrap();
    let back: TaskResultsPayload = serde_json::from_value(value).unwrap();
    assert_eq!(back.error, payload.error);
}

#[test]
fn task_update_tolerates_missing_optionals() {
    let update: TaskUpdate = serde_json::from_value(json!({
        "task_id": "job1-001",
        "stage": "executing",
        "complete": false,
    }))
    .unwrap();
    assert_eq!(update.stage, "executing");
    assert!(update.results.is_none());
    assert!(update.timestamp_ns.is_none());
}
