// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic health sampling for the agent process.
//!
//! The detailed container-stats sampler lives with the executor; this loop
//! emits a structured heartbeat so operators can tell a quiet agent from a
//! dead one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared counter of tasks seen on the most recent loop pass.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    active_tasks: Arc<AtomicUsize>,
}

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_active_tasks(&self, count: usize) {
        self.active_tasks.store(count, Ordering::Relaxed);
    }

    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Relaxed)
    }
}

/// Emit a heartbeat event every `interval` until the process exits.
pub async fn run(handle: MetricsHandle, backend: String, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        info!(
            target: "gantry_agent::metrics",
            backend = %backend,
            active_tasks = handle.active_tasks(),
            "agent heartbeat"
        );
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
