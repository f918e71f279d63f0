// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic telemetry of live jobs.
//!
//! Job spans only go out when a state is *left*; this loop emits a `TICK`
//! span with one child per active job every interval, giving near-realtime
//! visibility of what is currently running.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::job_tracing::job_attributes;
use gantry_core::{Clock, Job, State, SystemClock};
use gantry_storage::{find_where, Database, Filter};
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use rusqlite::types::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn ns_to_system_time(ns: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(ns.max(0) as u64)
}

/// Run the ticks loop until an error.
pub async fn run(db: Arc<Database>, config: Arc<ControllerConfig>) -> Result<(), ControllerError> {
    let clock = SystemClock;
    let mut last_run: Option<i64> = None;
    loop {
        let started = clock.epoch_ns();
        let active_jobs: Vec<Job> = db.with(|conn| {
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
        last_run = Some(record_tick(&db, &clock, last_run, &active_jobs));

        // The span pass can take a while; sleep the remaining interval with
        // a floor so telemetry cannot saturate the exporter
        let elapsed = Duration::from_nanos((clock.epoch_ns() - started).max(0) as u64);
        let remaining = config.tick_poll_interval.saturating_sub(elapsed);
        tokio::time::sleep(remaining.max(Duration::from_secs(2))).await;
    }
}

/// Emit one TICK span plus a child span per active job, all clamped to the
/// window since the previous tick. Returns the timestamp of this tick.
pub fn record_tick<C: Clock>(
    db: &Database,
    clock: &C,
    last_run: Option<i64>,
    active_jobs: &[Job],
) -> i64 {
    let now = clock.epoch_ns();
    let Some(start) = last_run else {
        // First pass establishes the window only
        return now;
    };

    let tracer = global::tracer("ticks");
    let mut tick_span = tracer
        .span_builder("TICK")
        .with_start_time(ns_to_system_time(start))
        .start(&tracer);

    for job in active_jobs {
        let attributes = db
            .with(|conn| Ok(job_attributes(conn, job, None)))
            .unwrap_or_default();
        let mut span = tracer
            .span_builder(job.status_code.span_name())
            .with_start_time(ns_to_system_time(start))
            .with_attributes(attributes)
            .start(&tracer);
        span.end_with_timestamp(ns_to_system_time(now));
    }

    tick_span.end_with_timestamp(ns_to_system_time(now));
    now
}

#[cfg(test)]
#[path = "ticks_tests.rs"]
mod tests;
