// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background-task supervision: a worker that dies is logged and restarted
//! after a fixed sleep, so the process never exits because a side task
//! failed.

use crate::error::ControllerError;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Delay before restarting a failed worker, preventing busy retry loops.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Spawn a named worker that is restarted whenever it returns.
pub fn spawn_supervised<F, Fut>(name: &'static str, factory: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ControllerError>> + Send + 'static,
{
    info!(worker = name, "starting worker");
    tokio::spawn(async move {
        loop {
            match factory().await {
                Ok(()) => {
                    info!(worker = name, "worker finished, restarting");
                }
                Err(err) => {
                    error!(worker = name, error = %err, "worker failed, restarting");
                }
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
    })
}
