// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A scriptable in-memory executor.
//!
//! Used by unit and integration tests, and as the execution backend when
//! `USING_DUMMY_DATA_BACKEND` is set (jobs "run" instantly with scripted
//! results).

use crate::api::{ExecutorApi, ExecutorError, ExecutorState, JobResults, JobStatus};
use async_trait::async_trait;
use gantry_core::{JobDefinition, JobId, TaskErrorRecord};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    states: HashMap<JobId, ExecutorState>,
    /// Results to hand out at finalize time, keyed by job
    scripted: HashMap<JobId, JobResults>,
    /// Errors persisted by `finalize(error=...)`
    errors: HashMap<JobId, TaskErrorRecord>,
    /// Queued retry signals, popped by the next `get_status`
    retries: VecDeque<JobId>,
    /// Recorded calls as (method, job id)
    calls: Vec<(String, JobId)>,
    /// When set, `execute` completes immediately (dummy-data mode)
    auto_execute: bool,
    next_timestamp_ns: i64,
}

impl Inner {
    fn timestamp(&mut self) -> i64 {
        self.next_timestamp_ns += 1_000_000;
        self.next_timestamp_ns
    }

    fn state(&self, id: &JobId) -> ExecutorState {
        self.states.get(id).copied().unwrap_or(ExecutorState::Unknown)
    }

    fn status(&mut self, id: &JobId) -> JobStatus {
        let state = self.state(id);
        let mut status = JobStatus::new(state, self.timestamp());
        if state == ExecutorState::Finalized {
            status.results = Some(self.results_for(id));
        }
        if let Some(error) = self.errors.get(id) {
            status.message = Some(error.message.clone());
        }
        status
    }

    fn results_for(&self, id: &JobId) -> JobResults {
        self.scripted.get(id).cloned().unwrap_or(JobResults {
            exit_code: Some(0),
            image_id: "sha256:0000feed".to_string(),
            ..JobResults::default()
        })
    }
}

/// Scriptable [`ExecutorApi`] implementation.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.inner.lock().next_timestamp_ns = 1_000_000_000_000_000_000;
        fake
    }

    /// Executions complete as soon as they start (dummy-data mode).
    pub fn auto() -> Self {
        let fake = Self::new();
        fake.inner.lock().auto_execute = true;
        fake
    }

    /// Script the results the job finalizes with.
    pub fn script_results(&self, id: &JobId, results: JobResults) {
        self.inner.lock().scripted.insert(id.clone(), results);
    }

    /// Force the executor state for a job (test setup).
    pub fn set_state(&self, id: &JobId, state: ExecutorState) {
        self.inner.lock().states.insert(id.clone(), state);
    }

    /// Move an EXECUTING job to EXECUTED, as the container exiting would.
    pub fn finish_execution(&self, id: &JobId) {
        let mut inner = self.inner.lock();
        if inner.state(id) == ExecutorState::Executing {
            inner.states.insert(id.clone(), ExecutorState::Executed);
        }
    }

    /// Make the next `get_status` for this job raise a retry signal.
    pub fn push_retry(&self, id: &JobId) {
        self.inner.lock().retries.push_back(id.clone());
    }

    pub fn state_of(&self, id: &JobId) -> ExecutorState {
        self.inner.lock().state(id)
    }

    /// Recorded `(method, job id)` calls, in order.
    pub fn calls(&self) -> Vec<(String, JobId)> {
        self.inner.lock().calls.clone()
    }

    pub fn calls_for(&self, id: &JobId) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(_, call_id)| call_id == id)
            .map(|(method, _)| method.clone())
            .collect()
    }

    fn record(&self, method: &str, id: &JobId) {
        self.inner.lock().calls.push((method.to_string(), id.clone()));
    }
}

#[async_trait]
impl ExecutorApi for FakeExecutor {
    async fn prepare(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError> {
        self.record("prepare", &job.id);
        let mut inner = self.inner.lock();
        // Idempotent: only an unknown job starts preparing
        if inner.state(&job.id) == ExecutorState::Unknown {
            inner.states.insert(job.id.clone(), ExecutorState::Prepared);
        }
        Ok(inner.status(&job.id))
    }

    async fn execute(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError> {
        self.record("execute", &job.id);
        let mut inner = self.inner.lock();
        if inner.state(&job.id) == ExecutorState::Prepared {
            let next = if inner.auto_execute {
                ExecutorState::Executed
            } else {
                ExecutorState::Executing
            };
            inner.states.insert(job.id.clone(), next);
        }
        Ok(inner.status(&job.id))
    }

    async fn finalize(
        &self,
        job: &JobDefinition,
        cancelled: bool,
        error: Option<&TaskErrorRecord>,
    ) -> Result<JobStatus, ExecutorError> {
        let method = if cancelled {
            "finalize(cancelled)"
        } else if error.is_some() {
            "finalize(error)"
        } else {
            "finalize"
        };
        self.record(method, &job.id);
        let mut inner = self.inner.lock();
        if let Some(error) = error {
            inner.errors.insert(job.id.clone(), error.clone());
        }
        inner.states.insert(job.id.clone(), ExecutorState::Finalized);
        Ok(inner.status(&job.id))
    }

    async fn terminate(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError> {
        self.record("terminate", &job.id);
        let mut inner = self.inner.lock();
        if inner.state(&job.id) == ExecutorState::Executing {
            inner.states.insert(job.id.clone(), ExecutorState::Executed);
        }
        Ok(inner.status(&job.id))
    }

    async fn cleanup(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError> {
        self.record("cleanup", &job.id);
        let mut inner = self.inner.lock();
        inner.states.remove(&job.id);
        let timestamp = inner.timestamp();
        Ok(JobStatus::new(ExecutorState::Unknown, timestamp))
    }

    async fn get_status(&self, job: &JobDefinition) -> Result<JobStatus, ExecutorError> {
        let mut inner = self.inner.lock();
        if let Some(position) = inner.retries.iter().position(|id| id == &job.id) {
            inner.retries.remove(position);
            return Err(ExecutorError::Retry("executor busy".to_string()));
        }
        Ok(inner.status(&job.id))
    }

    async fn get_results(&self, job: &JobDefinition) -> Result<JobResults, ExecutorError> {
        let inner = self.inner.lock();
        if inner.state(&job.id) != ExecutorState::Finalized {
            return Err(ExecutorError::Error(format!(
                "job {} is not finalized",
                job.id
            )));
        }
        Ok(inner.results_for(&job.id))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
