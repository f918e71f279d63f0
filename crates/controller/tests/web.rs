// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP-level tests for the task RPC and client API.

use gantry_controller::job_tracing::JobTracer;
use gantry_controller::web::{router, AppState};
use gantry_controller::{ControllerConfig, FakeProjectSource};
use gantry_core::test_support;
use gantry_core::{Job, State, StatusCode, Task, TaskType};
use gantry_storage::{ensure_db, find_one, insert, Database, Filter};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

const AGENT_TOKEN: &str = "agent-secret";
const CLIENT_TOKEN: &str = "client-secret";

struct TestServer {
    address: SocketAddr,
    db: Arc<Database>,
    client: reqwest::Client,
}

async fn server() -> TestServer {
    let db = Arc::new(Database::open_in_memory().unwrap());
    ensure_db(&db).unwrap();

    let mut config = ControllerConfig::defaults_for(&["test"]);
    config
        .job_server_tokens
        .insert("test".to_string(), AGENT_TOKEN.to_string());
    config
        .client_tokens
        .insert(CLIENT_TOKEN.to_string(), vec!["test".to_string()]);

    let state = AppState {
        db: Arc::clone(&db),
        config: Arc::new(config),
        projects: Arc::new(FakeProjectSource::with_project(
            "https://github.com/permitted/study",
            test_support::linear_project(),
        )),
        tracer: Arc::new(JobTracer::new()),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });

    TestServer {
        address,
        db,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    fn add_task(&self, task: &Task) {
        self.db.with(|conn| insert(conn, task)).unwrap();
    }

    fn add_job(&self, job: &Job) {
        self.db.with(|conn| insert(conn, job)).unwrap();
    }
}

fn active_runjob(job: &Job, seq: u32) -> Task {
    let mut task = test_support::runjob_task(job, seq);
    task.created_at = Some(100);
    task
}

#[tokio::test]
async fn tasks_endpoint_requires_a_valid_token() {
    let server = server().await;

    let response = server
        .client
        .get(server.url("/test/tasks/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .get(server.url("/test/tasks/"))
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn unknown_backends_are_not_found() {
    let server = server().await;
    let response = server
        .client
        .get(server.url("/elsewhere/tasks/"))
        .header("Authorization", format!("Bearer {AGENT_TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn tasks_endpoint_lists_active_tasks_and_stamps_last_seen() {
    let server = server().await;
    let job = test_support::job("rap-1", "generate");
    server.add_task(&active_runjob(&job, 1));

    let response = server
        .client
        .get(server.url("/test/tasks/"))
        .header("Authorization", format!("Bearer {AGENT_TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["type"], "runjob");
    assert!(tasks[0].get("agent_stage").is_none(), "agent fields are not served");

    let last_seen = server
        .db
        .with(|conn| {
            gantry_storage::queries::get_flag_value(conn, "last-seen-at", "test")
        })
        .unwrap();
    assert!(last_seen.is_some());
}

#[tokio::test]
async fn dbstatus_tasks_come_before_runjob_tasks() {
    let server = server().await;
    let job = test_support::job("rap-1", "generate");
    server.add_task(&active_runjob(&job, 1));
    let mut probe = Task::new(
        "dbstatus-2026-x".into(),
        TaskType::DbStatus,
        "test",
        json!({"database_name": "default"}),
        HashMap::new(),
    );
    probe.created_at = Some(200);
    server.add_task(&probe);

    let body: Value = server
        .client
        .get(server.url("/test/tasks/"))
        .header("Authorization", format!("Bearer {AGENT_TOKEN}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kinds: Vec<&str> = body["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["dbstatus", "runjob"]);
}

#[tokio::test]
async fn task_update_round_trips_through_the_form_payload() {
    let server = server().await;
    let job = test_support::job("rap-1", "generate");
    let task = active_runjob(&job, 1);
    server.add_task(&task);

    let payload = json!({
        "task_id": task.id.as_str(),
        "stage": "executing",
        "results": null,
        "complete": false,
        "timestamp_ns": 1_000_000_000_000_000_000i64,
    });
    let response = server
        .client
        .post(server.url("/test/task/update/"))
        .header("Authorization", format!("Bearer {AGENT_TOKEN}"))
        .form(&[("payload", payload.to_string())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["response"], "Update successful");

    let stored: Task = server
        .db
        .with(|conn| find_one(conn, &Filter::new().eq("id", task.id.as_str())))
        .unwrap();
    assert_eq!(stored.agent_stage.as_deref(), Some("executing"));
}

#[tokio::test]
async fn updates_for_unknown_tasks_are_server_errors() {
    let server = server().await;
    let payload = json!({
        "task_id": "missing-001",
        "stage": "executing",
        "complete": false,
    });
    let response = server
        .client
        .post(server.url("/test/task/update/"))
        .header("Authorization", format!("Bearer {AGENT_TOKEN}"))
        .form(&[("payload", payload.to_string())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn create_endpoint_runs_the_resolver() {
    let server = server().await;
    let request = test_support::create_request("rap-1", &["analyse"]);
    let response = server
        .client
        .post(server.url("/rap/create/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 3);

    // Resubmission is a 200 "No change"
    let response = server
        .client
        .post(server.url("/rap/create/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], "No change");
    assert_eq!(body["count"], 3);
}

#[tokio::test]
async fn inconsistent_resubmission_is_a_bad_request() {
    let server = server().await;
    let mut request = test_support::create_request("rap-1", &["analyse"]);
    server
        .client
        .post(server.url("/rap/create/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&request)
        .send()
        .await
        .unwrap();

    request.original = json!({"created_by": "mallory"});
    let response = server
        .client
        .post(server.url("/rap/create/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn create_validation_errors_are_client_visible() {
    let server = server().await;
    let mut request = test_support::create_request("rap-1", &["analyse"]);
    request.workspace = "not a workspace!".to_string();
    let response = server
        .client
        .post(server.url("/rap/create/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["details"].as_str().unwrap().contains("workspace"));
}

#[tokio::test]
async fn create_refuses_backends_outside_the_token() {
    let server = server().await;
    let mut request = test_support::create_request("rap-1", &["analyse"]);
    request.backend = "tpp".to_string();
    let response = server
        .client
        .post(server.url("/rap/create/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn cancel_flags_jobs_and_reports_missing_ones() {
    let server = server().await;
    let job = test_support::job("rap-1", "generate");
    server.add_job(&job);

    let response = server
        .client
        .post(server.url("/rap/cancel/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&json!({"rap_id": "rap-1", "actions": ["generate"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let stored: Job = server
        .db
        .with(|conn| find_one(conn, &Filter::new().eq("id", job.id.as_str())))
        .unwrap();
    assert!(stored.cancelled);

    // Unknown rap -> 404
    let response = server
        .client
        .post(server.url("/rap/cancel/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&json!({"rap_id": "rap-9", "actions": ["generate"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Unknown action -> 404
    let response = server
        .client
        .post(server.url("/rap/cancel/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&json!({"rap_id": "rap-1", "actions": ["mystery"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn status_reports_jobs_and_unrecognised_ids() {
    let server = server().await;
    let mut job = test_support::job("rap-1", "generate");
    job.state = State::Running;
    job.status_code = StatusCode::Executing;
    server.add_job(&job);

    let body: Value = server
        .client
        .post(server.url("/rap/status/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .json(&json!({"rap_ids": ["rap-1", "rap-unknown"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status_code"], "executing");
    assert!(jobs[0].get("trace_context").is_none());
    assert_eq!(body["unrecognised_rap_ids"], json!(["rap-unknown"]));
}

#[tokio::test]
async fn backend_status_summarises_flags() {
    let server = server().await;
    server
        .db
        .with(|conn| {
            gantry_storage::queries::set_flag(
                conn,
                "paused",
                Some("true".to_string()),
                "test",
                1_000_000_000,
            )?;
            gantry_storage::queries::set_flag(
                conn,
                "mode",
                Some("db-maintenance".to_string()),
                "test",
                1_000_000_100,
            )
        })
        .unwrap();

    let body: Value = server
        .client
        .get(server.url("/backend/status/"))
        .header("Authorization", format!("Bearer {CLIENT_TOKEN}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let backends = body["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 1);
    assert_eq!(backends[0]["slug"], "test");
    assert_eq!(backends[0]["paused"]["status"], "on");
    assert_eq!(backends[0]["db_maintenance"]["status"], "on");
    assert_eq!(backends[0]["db_maintenance"]["type"], "scheduled");
}
