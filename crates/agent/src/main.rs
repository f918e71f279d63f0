// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gantry agent service.
//!
//! Runs the task loop in the foreground with the metrics heartbeat as a
//! background task. A task-loop error exits the process so the external
//! service manager restarts it; in-flight work is re-derived from executor
//! state on the next pass.

use gantry_agent::dbstatus::FakeStatusProbe;
use gantry_agent::task_api::HttpTaskApi;
use gantry_agent::{metrics, telemetry, Agent, AgentConfig};
use gantry_core::SystemClock;
use gantry_executor::FakeExecutor;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init("gantry-agent");

    let config = AgentConfig::from_env()?;
    info!(
        backend = %config.backend,
        endpoint = %config.task_api_endpoint,
        dummy = config.using_dummy_data_backend,
        "agent service started"
    );

    // The container-runtime executor is deployment-specific; the dummy
    // executor runs everything instantly with empty results, which is what
    // dummy-data backends want. TODO: select the real executor here once
    // its crate lands.
    let executor = FakeExecutor::auto();
    let probe = FakeStatusProbe::new();
    let tasks = HttpTaskApi::new(&config);

    let agent = Agent::new(executor, tasks, probe, config.clone(), SystemClock);

    let _metrics = tokio::spawn(metrics::run(
        agent.metrics(),
        config.backend.clone(),
        config.stats_poll_interval,
    ));

    agent.run().await?;
    Ok(())
}
