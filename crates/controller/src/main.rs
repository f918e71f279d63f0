// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gantry controller service.
//!
//! Runs the scheduling loop in the foreground with the HTTP surface and the
//! ticks telemetry loop as supervised background tasks. A scheduling-loop
//! error exits the process so the external service manager can restart it
//! from persisted state.

use gantry_controller::runner::Controller;
use gantry_controller::service::spawn_supervised;
use gantry_controller::web::{serve, AppState};
use gantry_controller::{telemetry, ticks, ControllerConfig, FakeProjectSource};
use gantry_core::SystemClock;
use gantry_storage::{ensure_db, Database};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init("gantry-controller");

    let config = Arc::new(ControllerConfig::from_env()?);
    let db = Arc::new(Database::open(&config.database_path)?);
    ensure_db(&db)?;

    info!(
        backends = config.backends.join(","),
        database = %config.database_path.display(),
        "controller service started"
    );

    // Until a git/pipeline resolver is wired in, the project source serves
    // nothing: create requests fail cleanly with "no project file found".
    // TODO: replace with the git-backed resolver once it is packaged.
    let projects = Arc::new(FakeProjectSource::new());

    let state = AppState {
        db: Arc::clone(&db),
        config: Arc::clone(&config),
        projects,
        tracer: Arc::new(gantry_controller::job_tracing::JobTracer::new()),
    };

    let _web = {
        let state = state.clone();
        let bind_address = config.bind_address.clone();
        spawn_supervised("web", move || {
            let state = state.clone();
            let bind_address = bind_address.clone();
            async move { serve(state, &bind_address).await }
        })
    };
    let _ticks = {
        let db = Arc::clone(&db);
        let config = Arc::clone(&config);
        spawn_supervised("tick", move || {
            let db = Arc::clone(&db);
            let config = Arc::clone(&config);
            async move { ticks::run(db, config).await }
        })
    };

    let controller = Controller::new(db, config, SystemClock);
    controller.run().await?;
    Ok(())
}
