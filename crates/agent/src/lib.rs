// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-agent: drives the container runtime for one backend.
//!
//! Each tick the agent fetches its active tasks from the controller over
//! the task RPC, advances each one through the executor (prepare -> execute
//! -> finalize -> cleanup), and posts status updates back. The agent never
//! touches the controller's database; the RPC is its only channel.

pub mod config;
pub mod dbstatus;
mod error;
pub mod metrics;
pub mod redact;
pub mod runner;
pub mod secrets;
pub mod task_api;
pub mod telemetry;

pub use config::AgentConfig;
pub use dbstatus::{validate_db_status, FakeStatusProbe, ProbeError, StatusProbe};
pub use error::{is_fatal_task_error, AgentError};
pub use redact::redact_results;
pub use runner::Agent;
pub use task_api::{HttpTaskApi, RecordingTaskApi, TaskApi, TaskApiError};
