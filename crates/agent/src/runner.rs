// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent loop: fetch active tasks, drive each through the executor,
//! report back.

use crate::config::AgentConfig;
use crate::dbstatus::{validate_db_status, StatusProbe};
use crate::error::{is_fatal_task_error, AgentError};
use crate::metrics::MetricsHandle;
use crate::redact::redact_results;
use crate::secrets::inject_db_secrets;
use crate::task_api::TaskApi;
use gantry_core::{
    AgentTask, Clock, JobDefinition, SimpleTaskResults, TaskErrorRecord, TaskId,
    TaskResultsPayload, TaskType,
};
use gantry_executor::{ExecutorApi, ExecutorError, ExecutorState, JobStatus};
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// The agent's task-processing loop.
pub struct Agent<E, T, P, C> {
    executor: E,
    tasks: T,
    probe: P,
    config: AgentConfig,
    clock: C,
    /// Executor retry signals seen per task, surfaced as a span attribute
    retry_counts: Mutex<HashMap<TaskId, u32>>,
    metrics: MetricsHandle,
}

impl<E, T, P, C> Agent<E, T, P, C>
where
    E: ExecutorApi,
    T: TaskApi,
    P: StatusProbe,
    C: Clock,
{
    pub fn new(executor: E, tasks: T, probe: P, config: AgentConfig, clock: C) -> Self {
        Self {
            executor,
            tasks,
            probe,
            config,
            clock,
            retry_counts: Mutex::new(HashMap::new()),
            metrics: MetricsHandle::new(),
        }
    }

    /// The shared counter the metrics loop reports from.
    pub fn metrics(&self) -> MetricsHandle {
        self.metrics.clone()
    }

    /// Run ticks forever; an errored task aborts so the supervisor can
    /// restart the loop (the failed task is inactive by then or picked up
    /// cleanly on the next fetch).
    pub async fn run(&self) -> Result<(), AgentError> {
        info!(backend = %self.config.backend, "agent loop started");
        loop {
            self.tick().await?;
            tokio::time::sleep(self.config.job_loop_interval).await;
        }
    }

    /// One tick: fetch and handle every active task.
    pub async fn tick(&self) -> Result<Vec<AgentTask>, AgentError> {
        let tasks = match self.tasks.get_active_tasks().await {
            Ok(tasks) => tasks,
            Err(err) => {
                // Transient by definition: nothing has changed state, the
                // next tick simply retries the fetch
                warn!(error = %err, "could not fetch tasks from controller");
                return Ok(vec![]);
            }
        };

        self.metrics.record_active_tasks(tasks.len());
        let tracer = global::tracer("agent_loop");
        let mut loop_span = tracer.start("AGENT_LOOP");
        let mut errored = 0usize;

        for task in &tasks {
            let mut span = tracer.start("LOOP_TASK");
            span.set_attribute(KeyValue::new("task.id", task.id.to_string()));
            span.set_attribute(KeyValue::new("task.backend", task.backend.clone()));
            span.set_attribute(KeyValue::new("task.type", task.kind.as_str()));
            for (key, value) in &task.attributes {
                span.set_attribute(KeyValue::new(format!("task.{key}"), value.clone()));
            }

            match self.handle_single_task(task).await {
                Ok(()) => {}
                Err(AgentError::Executor(ExecutorError::Retry(message))) => {
                    // Back-pressure, not an error: leave all state alone
                    // and try again next tick
                    let count = {
                        let mut counts = self.retry_counts.lock();
                        let count = counts.entry(task.id.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    span.set_attribute(KeyValue::new("task.executor_retry", true));
                    span.set_attribute(KeyValue::new(
                        "task.executor_retry_count",
                        i64::from(count),
                    ));
                    warn!(task = %task.id, retries = count, detail = %message, "executor asked for retry");
                }
                Err(err) => {
                    // Record and move on so one bad task cannot block the
                    // rest of the queue; the loop restarts afterwards
                    errored += 1;
                    error!(task = %task.id, error = %err, "task error");
                    let fatal = is_fatal_task_error(&err);
                    span.set_attribute(KeyValue::new("task.fatal_error", fatal));
                    if fatal {
                        if let Err(mark_err) = self.mark_task_as_error(task, &err).await {
                            error!(task = %task.id, error = %mark_err, "could not report task error");
                        }
                    }
                }
            }
            span.end();
        }

        loop_span.set_attribute(KeyValue::new("handled_tasks", tasks.len() as i64));
        loop_span.set_attribute(KeyValue::new("errored_tasks", errored as i64));
        loop_span.end();

        if errored > 0 {
            return Err(AgentError::TasksFailed { count: errored });
        }
        Ok(tasks)
    }

    async fn handle_single_task(&self, task: &AgentTask) -> Result<(), AgentError> {
        match task.kind {
            TaskType::RunJob => self.handle_run_job_task(task).await,
            TaskType::CancelJob => self.handle_cancel_job_task(task).await,
            TaskType::DbStatus => self.handle_db_status_task(task).await,
        }
    }

    /// Advance a job one step along the executor pipeline.
    async fn handle_run_job_task(&self, task: &AgentTask) -> Result<(), AgentError> {
        let mut job: JobDefinition = serde_json::from_value(task.definition.clone())?;
        let status = self.executor.get_status(&job).await?;

        match status.state {
            // Terminal from the agent's point of view: report and be done
            ExecutorState::Finalized | ExecutorState::Error => {
                self.post(task, &status, true).await
            }

            // Still running: heartbeat only, no executor side effects
            ExecutorState::Executing => self.post(task, &status, false).await,

            // A new job. Prepare is synchronous, so bracket it: report
            // PREPARING, do the work, report the outcome.
            ExecutorState::Unknown => {
                self.post_stage(task, ExecutorState::Preparing).await?;
                self.executor.prepare(&job).await?;
                let status = self.executor.get_status(&job).await?;
                self.post(task, &status, false).await
            }

            ExecutorState::Prepared => {
                // Secrets are injected only now: prepare has finished, so
                // nothing secret can end up inside the workspace image
                if job.allow_database_access {
                    inject_db_secrets(&self.config, &mut job)?;
                }
                self.executor.execute(&job).await?;
                let status = self.executor.get_status(&job).await?;
                self.post(task, &status, false).await
            }

            // Finalize is synchronous too, and cleanup runs before the
            // final (complete) report
            ExecutorState::Executed => {
                self.post_stage(task, ExecutorState::Finalizing).await?;
                self.executor.finalize(&job, false, None).await?;
                let status = self.executor.get_status(&job).await?;
                self.executor.cleanup(&job).await?;
                self.post(task, &status, true).await
            }

            // An asynchronous transition is still in flight
            ExecutorState::Preparing | ExecutorState::Finalizing => {
                self.post(task, &status, false).await
            }
        }
    }

    /// Wind down a cancelled job. What needs doing depends on how far the
    /// job got.
    async fn handle_cancel_job_task(&self, task: &AgentTask) -> Result<(), AgentError> {
        let job: JobDefinition = serde_json::from_value(task.definition.clone())?;
        let initial = self.executor.get_status(&job).await?;
        self.post(task, &initial, false).await?;

        let final_status = match initial.state {
            // Already finished and finalized; nothing to do
            ExecutorState::Finalized => initial,

            // A live container has to be killed first, and the interim
            // state reported before the (blocking) finalize
            ExecutorState::Executing => {
                self.executor.terminate(&job).await?;
                let interim = self.executor.get_status(&job).await?;
                self.post(task, &interim, false).await?;
                self.executor.finalize(&job, true, None).await?;
                self.executor.get_status(&job).await?
            }

            // Everything else gets finalized with the cancellation marker
            // so the job log and metadata are preserved
            _ => {
                self.executor.finalize(&job, true, None).await?;
                self.executor.get_status(&job).await?
            }
        };

        // Nothing may be left behind, whether or not anything ever started
        self.executor.cleanup(&job).await?;
        self.post(task, &final_status, true).await
    }

    /// Run the database maintenance probe. Failures are reported in the
    /// task results rather than raised: a broken probe must not take the
    /// loop down.
    async fn handle_db_status_task(&self, task: &AgentTask) -> Result<(), AgentError> {
        let database_name = task
            .definition
            .get("database_name")
            .and_then(|value| value.as_str())
            .unwrap_or("default")
            .to_string();

        let results = match self.probe.database_status(&database_name).await {
            Ok(line) => match validate_db_status(&line) {
                Ok(status) => {
                    info!(database = %database_name, status = %status, "database status probe");
                    SimpleTaskResults {
                        results: Some(json!({"status": status})),
                        error: None,
                    }
                }
                Err(err) => SimpleTaskResults {
                    results: None,
                    error: Some(TaskErrorRecord {
                        exception: "InvalidDbStatus".to_string(),
                        message: err.to_string(),
                        traceback: String::new(),
                    }),
                },
            },
            Err(err) => SimpleTaskResults {
                results: None,
                error: Some(TaskErrorRecord {
                    exception: "ProbeError".to_string(),
                    message: err.to_string(),
                    traceback: String::new(),
                }),
            },
        };

        self.tasks
            .update_controller(
                task,
                // Stage is not meaningful for simple tasks
                "",
                Some(serde_json::to_value(results)?),
                true,
                Some(self.clock.epoch_ns()),
            )
            .await?;
        Ok(())
    }

    /// Report an intermediate stage with the agent's own timestamp.
    async fn post_stage(&self, task: &AgentTask, stage: ExecutorState) -> Result<(), AgentError> {
        self.tasks
            .update_controller(
                task,
                stage.as_str(),
                None,
                false,
                Some(self.clock.epoch_ns()),
            )
            .await?;
        Ok(())
    }

    /// Report an executor status, with redacted results when present.
    async fn post(
        &self,
        task: &AgentTask,
        status: &JobStatus,
        complete: bool,
    ) -> Result<(), AgentError> {
        let results = if let Some(results) = &status.results {
            Some(serde_json::to_value(TaskResultsPayload {
                error: None,
                results: Some(redact_results(results)),
            })?)
        } else if status.state == ExecutorState::Error {
            Some(serde_json::to_value(TaskResultsPayload {
                error: Some(TaskErrorRecord {
                    exception: "ExecutorError".to_string(),
                    message: status
                        .message
                        .clone()
                        .unwrap_or_else(|| "executor error".to_string()),
                    traceback: String::new(),
                }),
                results: None,
            })?)
        } else {
            None
        };

        self.tasks
            .update_controller(
                task,
                status.state.as_str(),
                results,
                complete,
                Some(status.timestamp_ns),
            )
            .await?;
        Ok(())
    }

    /// Pass error information to the controller and mark the task complete,
    /// persisting the error via finalize so a later status query can still
    /// see it.
    async fn mark_task_as_error(&self, task: &AgentTask, err: &AgentError) -> Result<(), AgentError> {
        let record = TaskErrorRecord {
            exception: "AgentError".to_string(),
            message: err.to_string(),
            traceback: String::new(),
        };
        match task.kind {
            TaskType::RunJob | TaskType::CancelJob => {
                let job: JobDefinition = serde_json::from_value(task.definition.clone())?;
                self.executor.finalize(&job, false, Some(&record)).await?;
                let status = self.executor.get_status(&job).await?;
                let payload = TaskResultsPayload {
                    error: Some(record),
                    results: status.results.as_ref().map(redact_results),
                };
                self.tasks
                    .update_controller(
                        task,
                        status.state.as_str(),
                        Some(serde_json::to_value(payload)?),
                        true,
                        Some(status.timestamp_ns),
                    )
                    .await?;
            }
            TaskType::DbStatus => {
                let results = SimpleTaskResults {
                    results: None,
                    error: Some(record),
                };
                self.tasks
                    .update_controller(task, "", Some(serde_json::to_value(results)?), true, None)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
