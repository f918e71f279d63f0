// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single place job status codes change: `set_code` and its side
//! effects.

use crate::error::ControllerError;
use crate::job_tracing::{JobTracer, SpanDetails};
use gantry_core::{check_transition, Clock, Job, JobTaskResults, State, StatusCode};
use gantry_storage::update;
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// Optional context accompanying a status change.
pub struct CodeUpdate<'a> {
    pub exception: Option<&'a str>,
    pub results: Option<&'a JobTaskResults>,
    /// Agent-measured timestamp of the transition; the controller clock is
    /// used when absent
    pub task_timestamp_ns: Option<i64>,
}

impl CodeUpdate<'_> {
    pub fn none() -> Self {
        CodeUpdate {
            exception: None,
            results: None,
            task_timestamp_ns: None,
        }
    }

    pub fn at(timestamp_ns: Option<i64>) -> Self {
        CodeUpdate {
            exception: None,
            results: None,
            task_timestamp_ns: timestamp_ns,
        }
    }
}

/// Set the granular status code, with every transition side effect:
/// coarse-state moves, `started_at`/`completed_at` bookkeeping, span
/// emission, timestamp clamping and the once-a-minute heartbeat.
///
/// Timestamps: the database keeps second precision for the user-facing
/// fields, but status transitions can be sub-second, so
/// `status_code_updated_at` is nanoseconds.
pub fn set_code<C: Clock>(
    conn: &Connection,
    tracer: &JobTracer,
    clock: &C,
    job: &mut Job,
    new_code: StatusCode,
    message: &str,
    details: CodeUpdate<'_>,
) -> Result<(), ControllerError> {
    let current_ns = clock.epoch_ns();
    let task_ns = details.task_timestamp_ns.unwrap_or(current_ns);

    if job.status_code != new_code {
        check_transition(job.status_code, new_code)?;

        // For a status change we prefer the task timestamp: it records when
        // the transition actually happened on the agent.
        let mut timestamp_ns = task_ns;
        if job.status_code_updated_at > timestamp_ns {
            // A negative duration, seen when timers disagree across hosts.
            // Clamp to one millisecond so downstream tooling keeps working.
            warn!(
                job = %job.id,
                before = job.status_code_updated_at,
                after = timestamp_ns,
                "negative state duration, clamping to 1ms"
            );
            timestamp_ns = job.status_code_updated_at + 1_000_000;
        }
        let timestamp_s = timestamp_ns / 1_000_000_000;

        match new_code {
            StatusCode::Initiated
            | StatusCode::Preparing
            | StatusCode::Prepared
            | StatusCode::Executing => {
                job.state = State::Running;
                if job.started_at.is_none() {
                    job.started_at = Some(timestamp_s);
                }
            }
            StatusCode::CancelledByUser => {
                // Only set after any finalize/cleanup has run on the agent.
                // The cancel request itself already stamped completed_at.
                job.state = State::Failed;
                if job.completed_at.is_none() {
                    job.completed_at = Some(timestamp_s);
                }
            }
            code if code.is_final() => {
                job.completed_at = Some(timestamp_s);
                job.state = if code == StatusCode::Succeeded {
                    State::Succeeded
                } else {
                    State::Failed
                };
            }
            code if code.is_reset() => {
                job.state = State::Pending;
                job.started_at = None;
            }
            // Remaining running/pending codes keep the coarse state
            _ => {}
        }

        // Close the span for the state we are leaving
        tracer.finish_current_state(
            conn,
            job,
            timestamp_ns,
            &SpanDetails {
                error: details.exception,
                results: details.results,
            },
        );

        job.status_code = new_code;
        job.status_message = message.to_string();
        job.updated_at = timestamp_s;
        job.status_code_updated_at = timestamp_ns;
        update_job(conn, job)?;

        if new_code.is_final() {
            tracer.record_final_state(
                conn,
                job,
                timestamp_ns,
                &SpanDetails {
                    error: details.exception,
                    results: details.results,
                },
            );
        }

        info!(
            job = %job.id,
            status_code = %job.status_code,
            "{}",
            job.status_message
        );
    } else {
        // Unchanged code: refresh updated_at at most once a minute, so the
        // user can see the job is alive without a write on every poll.
        let timestamp_s = current_ns / 1_000_000_000;
        if timestamp_s - job.updated_at < 60 {
            return Ok(());
        }
        job.updated_at = timestamp_s;
        debug!(job = %job.id, "refreshing job timestamp");
        update_job(conn, job)?;
        // Long-running jobs get a log confirmation roughly every ten
        // minutes rather than on every refresh.
        if (timestamp_s / 60) % 10 == 0 {
            info!(
                job = %job.id,
                status_code = %job.status_code,
                "{}",
                job.status_message
            );
        }
    }
    Ok(())
}

/// Touch a job's timestamps without changing its code.
pub fn refresh_job_timestamps<C: Clock>(
    conn: &Connection,
    tracer: &JobTracer,
    clock: &C,
    job: &mut Job,
) -> Result<(), ControllerError> {
    let message = job.status_message.clone();
    set_code(
        conn,
        tracer,
        clock,
        job,
        job.status_code,
        &message,
        CodeUpdate::none(),
    )
}

/// Persist a job, leaving `cancelled` alone.
///
/// The cancelled flag is written by the external request handler; it never
/// rewrites any other field after creation, so excluding it makes this
/// update safe against concurrent cancellation.
pub fn update_job(conn: &Connection, job: &Job) -> Result<(), ControllerError> {
    update(conn, job, &["cancelled"])?;
    Ok(())
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
