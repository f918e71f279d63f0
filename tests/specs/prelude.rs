// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for the behavioral specifications.

#![allow(dead_code)]

use async_trait::async_trait;
use gantry_agent::dbstatus::FakeStatusProbe;
use gantry_agent::task_api::{TaskApi, TaskApiError};
use gantry_agent::{Agent, AgentConfig};
use gantry_controller::job_tracing::JobTracer;
use gantry_controller::runner::Controller;
use gantry_controller::{create_jobs, task_api, ControllerConfig, CreateJobsError, FakeProjectSource};
use gantry_core::test_support;
use gantry_core::{AgentTask, CreateRequest, FakeClock, Job, State, TaskUpdate};
use gantry_executor::FakeExecutor;
use gantry_storage::{ensure_db, find_one, find_where, Database, Filter};
use std::sync::Arc;

/// An in-process task API: the agent's calls are served straight from the
/// controller's task table, mirroring the HTTP RPC contract.
pub struct LocalTaskApi {
    db: Arc<Database>,
    backend: String,
    clock: FakeClock,
}

#[async_trait]
impl TaskApi for LocalTaskApi {
    async fn get_active_tasks(&self) -> Result<Vec<AgentTask>, TaskApiError> {
        self.db
            .with(|conn| task_api::get_active_tasks(conn, &self.backend))
            .map(|tasks| tasks.iter().map(AgentTask::from).collect())
            .map_err(|err| TaskApiError::Transport(err.to_string()))
    }

    async fn update_controller(
        &self,
        task: &AgentTask,
        stage: &str,
        results: Option<serde_json::Value>,
        complete: bool,
        timestamp_ns: Option<i64>,
    ) -> Result<(), TaskApiError> {
        task_api::handle_task_update(
            &self.db,
            &self.clock,
            &TaskUpdate {
                task_id: task.id.clone(),
                stage: stage.to_string(),
                results,
                complete,
                timestamp_ns,
            },
        )
        .map_err(|err| TaskApiError::Status {
            status: 500,
            body: err.to_string(),
        })
    }
}

pub struct Harness {
    pub db: Arc<Database>,
    pub clock: FakeClock,
    pub controller: Controller<FakeClock>,
    pub agent: Agent<FakeExecutor, LocalTaskApi, FakeStatusProbe, FakeClock>,
    pub executor: FakeExecutor,
    pub probe: FakeStatusProbe,
    pub projects: FakeProjectSource,
    pub config: Arc<ControllerConfig>,
    pub tracer: JobTracer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::defaults_for(&["test"]))
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self::build(db, config)
    }

    /// A harness over a file-backed database, for restart tests. The clock
    /// and executor state start fresh, just like a restarted process.
    pub fn on_disk(path: &std::path::Path) -> Self {
        let db = Arc::new(Database::open(path).unwrap());
        Self::build(db, ControllerConfig::defaults_for(&["test"]))
    }

    fn build(db: Arc<Database>, config: ControllerConfig) -> Self {
        ensure_db(&db).unwrap();
        let clock = FakeClock::new();
        let config = Arc::new(config);
        let controller = Controller::new(Arc::clone(&db), Arc::clone(&config), clock.clone());

        let executor = FakeExecutor::new();
        let probe = FakeStatusProbe::new();
        let agent = Agent::new(
            executor.clone(),
            LocalTaskApi {
                db: Arc::clone(&db),
                backend: "test".to_string(),
                clock: clock.clone(),
            },
            probe.clone(),
            AgentConfig::defaults(),
            clock.clone(),
        );

        let projects = FakeProjectSource::with_project(
            "https://github.com/permitted/study",
            test_support::linear_project(),
        );

        Self {
            db,
            clock,
            controller,
            agent,
            executor,
            probe,
            projects,
            config,
            tracer: JobTracer::new(),
        }
    }

    pub async fn create(&self, request: &CreateRequest) -> Result<usize, CreateJobsError> {
        create_jobs(
            &self.db,
            &self.config,
            &self.projects,
            &self.tracer,
            &self.clock,
            request,
        )
        .await
    }

    pub fn controller_tick(&self) {
        self.controller.tick().unwrap();
    }

    pub async fn agent_tick(&self) {
        self.agent.tick().await.unwrap();
    }

    /// Advance both loops one round, finishing any container that reached
    /// EXECUTING so the pipeline keeps moving.
    pub async fn round(&self) {
        self.controller_tick();
        self.agent_tick().await;
        for job in self.jobs() {
            if self.executor.state_of(&job.id) == gantry_executor::ExecutorState::Executing {
                self.executor.finish_execution(&job.id);
            }
        }
        self.clock.advance(std::time::Duration::from_secs(1));
    }

    /// Run rounds until every job is terminal (or the round budget runs
    /// out, which fails the test with the live states for diagnosis).
    pub async fn run_to_completion(&self) {
        for _ in 0..30 {
            self.round().await;
            if self.jobs().iter().all(|job| !job.is_active()) {
                return;
            }
        }
        let states: Vec<String> = self
            .jobs()
            .iter()
            .map(|job| format!("{}={}", job.action, job.status_code))
            .collect();
        panic!("jobs did not complete: {}", states.join(", "));
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.db
            .with(|conn| find_where(conn, &Filter::new()))
            .unwrap()
    }

    pub fn job(&self, action: &str) -> Job {
        self.db
            .with(|conn| find_one(conn, &Filter::new().eq("action", action)))
            .unwrap()
    }

    pub fn cancel_actions(&self, rap_id: &str, actions: &[&str]) {
        let actions: Vec<String> = actions.iter().map(|a| a.to_string()).collect();
        gantry_controller::set_cancelled_flag(&self.db, &self.clock, rap_id, &actions).unwrap();
    }

    pub fn flag(&self, name: &str) -> Option<String> {
        self.db
            .with(|conn| gantry_storage::queries::get_flag_value(conn, name, "test"))
            .unwrap()
    }
}

pub fn assert_state(job: &Job, state: State) {
    assert_eq!(job.state, state, "job {} in {}", job.action, job.status_code);
}
