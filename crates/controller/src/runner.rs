// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller loop: poll active jobs, drive each one's state machine,
//! reconcile agent task updates, keep scheduled tasks fresh.

use crate::config::{database_exit_code_message, ControllerConfig};
use crate::error::{is_fatal_controller_error, is_fatal_job_error, ControllerError};
use crate::job_tracing::JobTracer;
use crate::maintenance::update_scheduled_tasks;
use crate::status::{refresh_job_timestamps, set_code, CodeUpdate};
use crate::task_api::{
    cancel_job, create_task_for_job, get_cancel_task_for_job, get_task_for_job, insert_task,
};
use gantry_core::{flag, Clock, Job, JobTaskResults, State, StatusCode};
use gantry_storage::queries::get_flag_value;
use gantry_storage::{find_where, select_values, Database, Filter, StorageError};
use opentelemetry::trace::Span;
use opentelemetry::KeyValue;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal error: this usually means a platform issue rather \
     than a problem for users to fix.\nThe tech team are automatically notified of these errors \
     and will be investigating.";

/// The controller's scheduling loop.
pub struct Controller<C: Clock> {
    db: Arc<Database>,
    config: Arc<ControllerConfig>,
    clock: C,
    tracer: JobTracer,
}

impl<C: Clock> Controller<C> {
    pub fn new(db: Arc<Database>, config: Arc<ControllerConfig>, clock: C) -> Self {
        Self {
            db,
            config,
            clock,
            tracer: JobTracer::new(),
        }
    }

    pub fn tracer(&self) -> &JobTracer {
        &self.tracer
    }

    /// Run ticks forever. A locked database skips the tick; any other error
    /// aborts so the service supervisor can restart us from a clean slate.
    pub async fn run(&self) -> Result<(), ControllerError> {
        info!("controller loop started");
        loop {
            match self.tick() {
                Ok(_) => {}
                Err(ControllerError::Storage(StorageError::Locked)) => {
                    warn!("database locked, retrying on next tick");
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(self.config.job_loop_interval).await;
        }
    }

    /// One tick: handle every active job, then the scheduled-task pass.
    pub fn tick(&self) -> Result<Vec<Job>, ControllerError> {
        let mut span = self.tracer.span("LOOP");
        span.set_attribute(KeyValue::new("loop", true));
        let handled = self.handle_jobs();
        span.end();

        update_scheduled_tasks(&self.db, &self.config, &self.clock)?;
        handled
    }

    fn handle_jobs(&self) -> Result<Vec<Job>, ControllerError> {
        let mut active: Vec<Job> = self.db.with(|conn| {
            find_where(
                conn,
                &Filter::new().any_of(
                    "state",
                    [
                        Value::Text(State::Pending.as_str().to_string()),
                        Value::Text(State::Running.as_str().to_string()),
                    ],
                ),
            )
        })?;

        let mut running_for_workspace: HashMap<(String, String), u32> = HashMap::new();
        let mut handled = Vec::new();

        while !active.is_empty() {
            // Re-sort on every round: the per-workspace running counts
            // change as we work through the list.
            active.sort_by_cached_key(|job| {
                (
                    // Running jobs first, so the counts below are complete
                    // by the time we start pending ones
                    if job.state == State::Running { 0u8 } else { 1 },
                    // Fewest running jobs in the same backend/workspace
                    // first: fairer allocation of capacity among workspaces
                    running_for_workspace
                        .get(&(job.backend.clone(), job.workspace.clone()))
                        .copied()
                        .unwrap_or(0),
                    // Database jobs outrank cpu jobs
                    if job.requires_db { 0u8 } else { 1 },
                    // Age as the tie-breaker
                    job.created_at,
                )
            });
            let mut job = active.remove(0);

            self.handle_single_job(&mut job)?;

            if job.state == State::Running {
                *running_for_workspace
                    .entry((job.backend.clone(), job.workspace.clone()))
                    .or_insert(0) += 1;
            }
            handled.push(job);
        }
        Ok(handled)
    }

    /// Top-level handler for one job: re-reads flags, wraps the state
    /// machine in a span and the fatal-error policy.
    pub fn handle_single_job(&self, job: &mut Job) -> Result<(), ControllerError> {
        // Flags are re-read before each job so operational changes apply as
        // soon as possible mid-tick.
        let (mode, paused) = self.db.with(|conn| {
            let mode = get_flag_value(conn, flag::names::MODE, &job.backend)?;
            let paused = get_flag_value(conn, flag::names::PAUSED, &job.backend)?
                .map(|value| value.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            Ok((mode, paused))
        })?;

        let mut span = self.tracer.span("LOOP_JOB");
        span.set_attribute(KeyValue::new("job.id", job.id.to_string()));
        span.set_attribute(KeyValue::new("job.initial_state", job.state.as_str()));
        span.set_attribute(KeyValue::new(
            "job.initial_code",
            job.status_code.as_str(),
        ));

        match self.handle_job(job, mode.as_deref(), paused) {
            Ok(()) => {
                span.set_attribute(KeyValue::new("job.final_state", job.state.as_str()));
                span.set_attribute(KeyValue::new("job.final_code", job.status_code.as_str()));
                span.end();
                Ok(())
            }
            Err(err) => {
                let fatal = is_fatal_controller_error(&err);
                span.set_attribute(KeyValue::new("job.fatal_error", fatal));
                span.end();
                if fatal {
                    let message = err.to_string();
                    let marked = self.db.with(|conn| {
                        Ok(set_code(
                            conn,
                            &self.tracer,
                            &self.clock,
                            job,
                            StatusCode::InternalError,
                            INTERNAL_ERROR_MESSAGE,
                            CodeUpdate {
                                exception: Some(&message),
                                results: None,
                                task_timestamp_ns: None,
                            },
                        ))
                    });
                    match marked {
                        Ok(Ok(())) => {}
                        Ok(Err(mark_err)) => {
                            warn!(job = %job.id, error = %mark_err, "failed to record internal error");
                        }
                        Err(mark_err) => {
                            warn!(job = %job.id, error = %mark_err, "failed to record internal error");
                        }
                    }
                }
                // Propagating kills the loop, by design: the service
                // supervisor restarts it, and on restart this job is left
                // in whatever code it reached.
                Err(err)
            }
        }
    }

    /// The state machine for one active job.
    fn handle_job(
        &self,
        job: &mut Job,
        mode: Option<&str>,
        paused: bool,
    ) -> Result<(), ControllerError> {
        // Cancellation is user-driven, so handled explicitly first. The job
        // only becomes final once nothing is running on the agent any more:
        // a job with an active task gets a CANCELJOB and stays where it is
        // until the agent confirms the drain.
        if job.cancelled {
            return self.db.transaction::<_, ControllerError>(|conn| {
                let runjob = get_task_for_job(conn, job)?;
                // Only a cancel task belonging to the current RUNJOB counts;
                // one left over from an earlier attempt says nothing about
                // what is running now
                let cancel_task = get_cancel_task_for_job(conn, job)?.filter(|cancel| {
                    runjob
                        .as_ref()
                        .is_some_and(|task| cancel.id.as_str().starts_with(task.id.as_str()))
                });
                if let Some(cancel_task) = cancel_task {
                    if cancel_task.agent_complete {
                        return set_code(
                            conn,
                            &self.tracer,
                            &self.clock,
                            job,
                            StatusCode::CancelledByUser,
                            "Cancelled by user",
                            CodeUpdate::at(cancel_task.agent_timestamp_ns),
                        );
                    }
                    // Agent still draining the cancelled task
                    return refresh_job_timestamps(conn, &self.tracer, &self.clock, job);
                }
                if runjob.is_some_and(|task| task.active) {
                    cancel_job(conn, &self.clock, &self.config, job)?;
                    return refresh_job_timestamps(conn, &self.tracer, &self.clock, job);
                }
                // Nothing was ever sent to the agent (or it already came
                // back), so the job can be finalised right away
                set_code(
                    conn,
                    &self.tracer,
                    &self.clock,
                    job,
                    StatusCode::CancelledByUser,
                    "Cancelled by user",
                    CodeUpdate::none(),
                )
            });
        }

        if paused && job.state == State::Pending {
            if job.status_code == StatusCode::WaitingOnReboot {
                // Already reset in preparation for a reboot; just record
                // that we have seen it
                return self.db.with(|conn| {
                    Ok(refresh_job_timestamps(
                        conn,
                        &self.tracer,
                        &self.clock,
                        job,
                    ))
                })?;
            }
            return self.db.with(|conn| {
                Ok(set_code(
                    conn,
                    &self.tracer,
                    &self.clock,
                    job,
                    StatusCode::WaitingPaused,
                    "Backend is currently paused for maintenance, job will start once this is \
                     completed",
                    CodeUpdate::none(),
                ))
            })?;
        }

        if mode == Some(flag::MODE_DB_MAINTENANCE) && job.requires_db {
            return self.db.transaction::<_, ControllerError>(|conn| {
                if job.state == State::Running {
                    warn!(job = %job.id, "db maintenance mode active, killing db job");
                    cancel_job(conn, &self.clock, &self.config, job)?;
                }
                set_code(
                    conn,
                    &self.tracer,
                    &self.clock,
                    job,
                    StatusCode::WaitingDbMaintenance,
                    "Waiting for database to finish maintenance",
                    CodeUpdate::none(),
                )
            });
        }

        match job.state {
            State::Pending => self.handle_pending_job(job),
            State::Running => self.handle_running_job(job),
            other => Err(ControllerError::Internal(format!(
                "unexpected state {other} for job {}",
                job.id
            ))),
        }
    }

    fn handle_pending_job(&self, job: &mut Job) -> Result<(), ControllerError> {
        let awaited_states = self.states_of_awaited_jobs(job)?;
        if awaited_states.contains(&State::Failed) {
            return self.db.with(|conn| {
                Ok(set_code(
                    conn,
                    &self.tracer,
                    &self.clock,
                    job,
                    StatusCode::DependencyFailed,
                    "Not starting as dependency failed",
                    CodeUpdate::none(),
                ))
            })?;
        }
        if awaited_states.iter().any(|state| *state != State::Succeeded) {
            return self.db.with(|conn| {
                Ok(set_code(
                    conn,
                    &self.tracer,
                    &self.clock,
                    job,
                    StatusCode::WaitingOnDependencies,
                    "Waiting on dependencies",
                    CodeUpdate::none(),
                ))
            })?;
        }

        if let Some((code, message)) = self.reason_job_not_started(job)? {
            return self.db.with(|conn| {
                Ok(set_code(
                    conn,
                    &self.tracer,
                    &self.clock,
                    job,
                    code,
                    &message,
                    CodeUpdate::none(),
                ))
            })?;
        }

        // Clear to go: create the task and flip to INITIATED atomically
        self.db.transaction::<_, ControllerError>(|conn| {
            let mut task = create_task_for_job(conn, &self.config, job)?;
            insert_task(conn, &self.clock, &mut task)?;
            set_code(
                conn,
                &self.tracer,
                &self.clock,
                job,
                StatusCode::Initiated,
                "Job executing on the backend",
                CodeUpdate::none(),
            )
        })
    }

    fn handle_running_job(&self, job: &mut Job) -> Result<(), ControllerError> {
        let task = self
            .db
            .with(|conn| Ok(get_task_for_job(conn, job)))??
            .ok_or_else(|| ControllerError::TaskMissing { job: job.id.clone() })?;

        if task.agent_complete {
            let error_value = task
                .agent_results
                .as_ref()
                .and_then(|results| results.get("error"))
                .filter(|error| !error.is_null())
                .cloned();
            if let Some(error_value) = error_value {
                let error_text = error_value.to_string();
                if is_fatal_job_error(&error_text) {
                    return self.db.with(|conn| {
                        Ok(set_code(
                            conn,
                            &self.tracer,
                            &self.clock,
                            job,
                            StatusCode::JobError,
                            "This job returned a fatal error.",
                            CodeUpdate {
                                exception: Some(&error_text),
                                results: None,
                                task_timestamp_ns: task.agent_timestamp_ns,
                            },
                        ))
                    })?;
                }
                // Reset to pending: the next tick spawns a fresh task
                return self.db.with(|conn| {
                    Ok(set_code(
                        conn,
                        &self.tracer,
                        &self.clock,
                        job,
                        StatusCode::WaitingOnNewTask,
                        "Job returned an error that can be retried with a new task",
                        CodeUpdate {
                            exception: Some(&error_text),
                            results: None,
                            task_timestamp_ns: task.agent_timestamp_ns,
                        },
                    ))
                })?;
            }

            let results: JobTaskResults = match &task.agent_results {
                Some(value) => serde_json::from_value(value.clone())?,
                None => JobTaskResults::default(),
            };
            return self.save_results(job, &results, task.agent_timestamp_ns);
        }

        // The task exists but has not completed. Mirror whatever stage the
        // agent last reported; an unknown stage (error, unknown) leaves the
        // code untouched. The stage may also still be unset if the agent
        // has not reported yet.
        let code = match &task.agent_stage {
            Some(stage) => StatusCode::from_value(stage, job.status_code),
            None => job.status_code,
        };
        let message = job.status_message.clone();
        self.db.with(|conn| {
            Ok(set_code(
                conn,
                &self.tracer,
                &self.clock,
                job,
                code,
                &message,
                CodeUpdate::at(task.agent_timestamp_ns),
            ))
        })?
    }

    /// Map finalized results to the job's final code.
    fn save_results(
        &self,
        job: &mut Job,
        results: &JobTaskResults,
        timestamp_ns: Option<i64>,
    ) -> Result<(), ControllerError> {
        let (code, message) = match results.exit_code {
            Some(0) => {
                if results.has_unmatched_patterns {
                    // Missing outputs are very often just a typo in the
                    // project file, so say so prominently
                    (
                        StatusCode::UnmatchedPatterns,
                        "Outputs matching expected patterns were not found. See job log for \
                         details."
                            .to_string(),
                    )
                } else {
                    let mut message = "Completed successfully".to_string();
                    if results.has_level4_excluded_files {
                        message.push_str(
                            ", but some file(s) marked as moderately_sensitive were excluded. \
                             See job log for details.",
                        );
                    }
                    (StatusCode::Succeeded, message)
                }
            }
            exit_code => {
                let mut message = "Job exited with an error".to_string();
                if let Some(extra) = results.message.as_deref().filter(|m| !m.is_empty()) {
                    message.push_str(": ");
                    message.push_str(extra);
                } else if job.requires_db {
                    if let Some(known) =
                        exit_code.and_then(database_exit_code_message)
                    {
                        message.push_str(": ");
                        message.push_str(known);
                    }
                }
                (StatusCode::NonzeroExit, message)
            }
        };

        self.db.with(|conn| {
            Ok(set_code(
                conn,
                &self.tracer,
                &self.clock,
                job,
                code,
                &message,
                CodeUpdate {
                    exception: None,
                    results: Some(results),
                    task_timestamp_ns: timestamp_ns,
                },
            ))
        })?
    }

    fn states_of_awaited_jobs(&self, job: &Job) -> Result<Vec<State>, ControllerError> {
        if job.wait_for_job_ids.is_empty() {
            return Ok(vec![]);
        }
        let values: Vec<String> = self.db.with(|conn| {
            select_values::<Job, String>(
                conn,
                "state",
                &Filter::new().any_of(
                    "id",
                    job.wait_for_job_ids
                        .iter()
                        .map(|id| Value::Text(id.to_string())),
                ),
            )
        })?;
        Ok(values
            .iter()
            .filter_map(|value| State::from_value(value))
            .collect())
    }

    /// One good reason why this job cannot start right now, if any.
    fn reason_job_not_started(
        &self,
        job: &Job,
    ) -> Result<Option<(StatusCode, String)>, ControllerError> {
        let running: Vec<Job> = self.db.with(|conn| {
            find_where(
                conn,
                &Filter::new()
                    .eq("state", State::Running.as_str())
                    .eq("backend", job.backend.as_str()),
            )
        })?;

        let used: f64 = running
            .iter()
            .map(|running_job| self.config.resource_weight(running_job))
            .sum();
        let required = self.config.resource_weight(job);
        if used + required > self.config.max_workers_for(&job.backend) {
            let message = if required > 1.0 {
                "Waiting on available workers for resource intensive job"
            } else {
                "Waiting on available workers"
            };
            return Ok(Some((StatusCode::WaitingOnWorkers, message.to_string())));
        }

        if job.requires_db {
            let running_db_jobs = running.iter().filter(|j| j.requires_db).count();
            if running_db_jobs >= self.config.max_db_workers_for(&job.backend) {
                return Ok(Some((
                    StatusCode::WaitingOnDbWorkers,
                    "Waiting on available database workers".to_string(),
                )));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
