// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job state machine: coarse `State` plus fine-grained `StatusCode`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The overall high-level state the controller uses to decide how to handle
/// a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Pending,
    Running,
    Failed,
    Succeeded,
}

impl State {
    /// Active jobs are the ones the controller loop still has work to do for.
    pub fn is_active(&self) -> bool {
        matches!(self, State::Pending | State::Running)
    }

    /// Terminal states are persisted forever and never change again.
    pub fn is_final(&self) -> bool {
        matches!(self, State::Failed | State::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Running => "running",
            State::Failed => "failed",
            State::Succeeded => "succeeded",
        }
    }

    pub fn from_value(value: &str) -> Option<State> {
        match value {
            "pending" => Some(State::Pending),
            "running" => Some(State::Running),
            "failed" => Some(State::Failed),
            "succeeded" => Some(State::Succeeded),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fine-grained status of a job.
///
/// In contrast to [`State`], these play no role in deciding what happens to a
/// job; they are machine-readable versions of the human-readable
/// `status_message`, used for reporting and telemetry. Each code belongs to
/// exactly one coarse state (see [`StatusCode::state`]).
///
/// Declaration order is meaningful: codes compare by how far through the
/// lifecycle they are.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum StatusCode {
    // PENDING codes
    /// Initial state of a job, not yet running
    #[serde(rename = "created")]
    Created,
    /// Waiting for pause mode to exit
    #[serde(rename = "paused")]
    WaitingPaused,
    /// Waiting for db maintenance mode to exit
    #[serde(rename = "waiting_db_maintenance")]
    WaitingDbMaintenance,
    /// Waiting on dependency jobs
    #[serde(rename = "waiting_on_dependencies")]
    WaitingOnDependencies,
    /// Waiting on available resources to run the job
    #[serde(rename = "waiting_on_workers")]
    WaitingOnWorkers,
    /// Waiting on available db resources to run the job
    #[serde(rename = "waiting_on_db_workers")]
    WaitingOnDbWorkers,
    /// Reset in preparation for a reboot
    #[serde(rename = "waiting_on_reboot")]
    WaitingOnReboot,
    /// Reset so the loop respawns the job with a new task
    #[serde(rename = "waiting_on_new_task")]
    WaitingOnNewTask,

    // RUNNING codes. Initiated means a task has been created and sent to the
    // agent; the rest mirror the executor's stage pipeline.
    #[serde(rename = "initiated")]
    Initiated,
    #[serde(rename = "preparing")]
    Preparing,
    #[serde(rename = "prepared")]
    Prepared,
    #[serde(rename = "executing")]
    Executing,
    #[serde(rename = "executed")]
    Executed,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "finalized")]
    Finalized,

    // SUCCEEDED codes
    #[serde(rename = "succeeded")]
    Succeeded,

    // FAILED codes
    #[serde(rename = "dependency_failed")]
    DependencyFailed,
    #[serde(rename = "nonzero_exit")]
    NonzeroExit,
    #[serde(rename = "cancelled_by_user")]
    CancelledByUser,
    #[serde(rename = "unmatched_patterns")]
    UnmatchedPatterns,
    #[serde(rename = "internal_error")]
    InternalError,
    #[serde(rename = "killed_by_admin")]
    KilledByAdmin,
    #[serde(rename = "stale_codelists")]
    StaleCodelists,
    #[serde(rename = "job_error")]
    JobError,
}

impl StatusCode {
    /// All codes in declaration order.
    pub const ALL: [StatusCode; 24] = [
        StatusCode::Created,
        StatusCode::WaitingPaused,
        StatusCode::WaitingDbMaintenance,
        StatusCode::WaitingOnDependencies,
        StatusCode::WaitingOnWorkers,
        StatusCode::WaitingOnDbWorkers,
        StatusCode::WaitingOnReboot,
        StatusCode::WaitingOnNewTask,
        StatusCode::Initiated,
        StatusCode::Preparing,
        StatusCode::Prepared,
        StatusCode::Executing,
        StatusCode::Executed,
        StatusCode::Finalizing,
        StatusCode::Finalized,
        StatusCode::Succeeded,
        StatusCode::DependencyFailed,
        StatusCode::NonzeroExit,
        StatusCode::CancelledByUser,
        StatusCode::UnmatchedPatterns,
        StatusCode::InternalError,
        StatusCode::KilledByAdmin,
        StatusCode::StaleCodelists,
        StatusCode::JobError,
    ];

    /// The wire value used in the database and the task RPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Created => "created",
            StatusCode::WaitingPaused => "paused",
            StatusCode::WaitingDbMaintenance => "waiting_db_maintenance",
            StatusCode::WaitingOnDependencies => "waiting_on_dependencies",
            StatusCode::WaitingOnWorkers => "waiting_on_workers",
            StatusCode::WaitingOnDbWorkers => "waiting_on_db_workers",
            StatusCode::WaitingOnReboot => "waiting_on_reboot",
            StatusCode::WaitingOnNewTask => "waiting_on_new_task",
            StatusCode::Initiated => "initiated",
            StatusCode::Preparing => "preparing",
            StatusCode::Prepared => "prepared",
            StatusCode::Executing => "executing",
            StatusCode::Executed => "executed",
            StatusCode::Finalizing => "finalizing",
            StatusCode::Finalized => "finalized",
            StatusCode::Succeeded => "succeeded",
            StatusCode::DependencyFailed => "dependency_failed",
            StatusCode::NonzeroExit => "nonzero_exit",
            StatusCode::CancelledByUser => "cancelled_by_user",
            StatusCode::UnmatchedPatterns => "unmatched_patterns",
            StatusCode::InternalError => "internal_error",
            StatusCode::KilledByAdmin => "killed_by_admin",
            StatusCode::StaleCodelists => "stale_codelists",
            StatusCode::JobError => "job_error",
        }
    }

    /// Span names are the upper-cased code, e.g. `WAITING_ON_WORKERS`.
    pub fn span_name(&self) -> String {
        match self {
            // The wire value for WaitingPaused is the historical "paused";
            // keep the span name aligned with the code itself.
            StatusCode::WaitingPaused => "WAITING_PAUSED".to_string(),
            other => other.as_str().to_uppercase(),
        }
    }

    /// Parse a wire value strictly.
    pub fn parse(value: &str) -> Option<StatusCode> {
        Self::ALL.iter().copied().find(|code| code.as_str() == value)
    }

    /// Parse a wire value, falling back to `default` for anything unknown.
    ///
    /// Used when mirroring agent-reported executor stages into the job: an
    /// unknown stage (e.g. "error", "unknown") leaves the code unchanged.
    pub fn from_value(value: &str, default: StatusCode) -> StatusCode {
        Self::parse(value).unwrap_or(default)
    }

    /// The coarse state this code belongs to.
    pub fn state(&self) -> State {
        match self {
            StatusCode::Created
            | StatusCode::WaitingPaused
            | StatusCode::WaitingDbMaintenance
            | StatusCode::WaitingOnDependencies
            | StatusCode::WaitingOnWorkers
            | StatusCode::WaitingOnDbWorkers
            | StatusCode::WaitingOnReboot
            | StatusCode::WaitingOnNewTask => State::Pending,
            StatusCode::Initiated
            | StatusCode::Preparing
            | StatusCode::Prepared
            | StatusCode::Executing
            | StatusCode::Executed
            | StatusCode::Finalizing
            | StatusCode::Finalized => State::Running,
            StatusCode::Succeeded => State::Succeeded,
            StatusCode::DependencyFailed
            | StatusCode::NonzeroExit
            | StatusCode::CancelledByUser
            | StatusCode::UnmatchedPatterns
            | StatusCode::InternalError
            | StatusCode::KilledByAdmin
            | StatusCode::StaleCodelists
            | StatusCode::JobError => State::Failed,
        }
    }

    /// Final codes terminate the job; the row never changes again.
    pub fn is_final(&self) -> bool {
        self.state().is_final()
    }

    /// Reset codes send a job back to PENDING even after it has been
    /// RUNNING, clearing `started_at`.
    pub fn is_reset(&self) -> bool {
        matches!(
            self,
            StatusCode::WaitingOnReboot
                | StatusCode::WaitingDbMaintenance
                | StatusCode::WaitingOnNewTask
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected status-code transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job is already final in code {current}, cannot move to {requested}")]
    AlreadyFinal {
        current: StatusCode,
        requested: StatusCode,
    },
    #[error("cannot return to {requested} from {current}")]
    Backwards {
        current: StatusCode,
        requested: StatusCode,
    },
}

/// Validate a `(current, new)` status-code pair.
///
/// All transition side effects live in the controller's `set_code`; this is
/// the table it consults at the edge. Returns the coarse state the job will
/// hold after the transition.
pub fn check_transition(
    current: StatusCode,
    new: StatusCode,
) -> Result<State, TransitionError> {
    if current == new {
        return Ok(current.state());
    }
    if current.is_final() {
        return Err(TransitionError::AlreadyFinal {
            current,
            requested: new,
        });
    }
    // Created is only ever an initial code.
    if new == StatusCode::Created {
        return Err(TransitionError::Backwards {
            current,
            requested: new,
        });
    }
    Ok(new.state())
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
