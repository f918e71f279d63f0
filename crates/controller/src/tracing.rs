// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job telemetry: one root `JOB` span per job, one child span per
//! status-code interval.
//!
//! The root span's context is created when the job is inserted and
//! persisted in the job row, so spans survive controller restarts: each
//! interval span is an independent child anchored at the stored context,
//! and the root itself is emitted once, when the job completes, using the
//! stored ids.

use gantry_core::{Job, JobTaskResults, StatusCode};
use gantry_storage::{queries, StorageError};
use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{
    Span, SpanContext, SpanId, Status, TraceContextExt, TraceFlags, TraceId, TraceState, Tracer,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use rusqlite::Connection;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

/// Sanity floor for span timestamps (2000-01-01 in nanoseconds): anything
/// below this is a seconds-for-nanoseconds mixup.
const MINIMUM_NS_TIMESTAMP: i64 = 946_684_800_000_000_000;

fn ns_to_system_time(ns: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(ns.max(0) as u64)
}

/// Extra attributes attached to result-bearing spans.
pub struct SpanDetails<'a> {
    pub error: Option<&'a str>,
    pub results: Option<&'a JobTaskResults>,
}

impl<'a> SpanDetails<'a> {
    pub fn none() -> Self {
        Self {
            error: None,
            results: None,
        }
    }
}

/// Records job spans against the globally installed tracer provider.
///
/// With no provider configured every call is a cheap no-op, so recording is
/// unconditional.
pub struct JobTracer {
    tracer: BoxedTracer,
    propagator: TraceContextPropagator,
}

impl Default for JobTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracer {
    pub fn new() -> Self {
        Self {
            tracer: global::tracer("jobs"),
            propagator: TraceContextPropagator::new(),
        }
    }

    /// Start an ordinary wall-clock span (LOOP, LOOP_JOB, TRANSACTION).
    pub fn span(&self, name: &'static str) -> BoxedSpan {
        self.tracer.start(name)
    }

    /// Create the job's root trace context and persist it on the job.
    ///
    /// The root span itself is not emitted yet; only its ids exist until
    /// the job completes. That way a crash loses no spans and the root can
    /// cover the whole job life.
    pub fn initialise_job_trace(&self, job: &mut Job) {
        if !job.trace_context.is_empty() {
            warn!(job = %job.id, "job already has a trace context");
            return;
        }
        let trace_id = TraceId::from_bytes(Uuid::new_v4().into_bytes());
        let mut span_bytes = [0u8; 8];
        span_bytes.copy_from_slice(&Uuid::new_v4().into_bytes()[..8]);
        let span_id = SpanId::from_bytes(span_bytes);
        let span_context = SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        let cx = Context::new().with_remote_span_context(span_context);
        self.propagator.inject_context(&cx, &mut job.trace_context);
    }

    fn parent_context(&self, job: &Job) -> Option<Context> {
        if job.trace_context.is_empty() {
            // Jobs that predate tracing are simply not traced
            return None;
        }
        let cx = self.propagator.extract(&job.trace_context);
        if cx.span().span_context().is_valid() {
            Some(cx)
        } else {
            None
        }
    }

    /// Record a span for the status-code interval we are leaving.
    ///
    /// `job` still carries the old code; the interval runs from its
    /// `status_code_updated_at` to `end_ns`.
    pub fn finish_current_state(
        &self,
        conn: &Connection,
        job: &Job,
        end_ns: i64,
        details: &SpanDetails<'_>,
    ) {
        self.record_job_span(
            conn,
            job,
            job.status_code.span_name(),
            job.status_code_updated_at,
            end_ns,
            details,
            &[],
        );
    }

    /// Record the marker span for a final code and emit the root `JOB` span
    /// covering the whole job life.
    ///
    /// `job` already carries the final code and timestamps.
    pub fn record_final_state(
        &self,
        conn: &Connection,
        job: &Job,
        timestamp_ns: i64,
        details: &SpanDetails<'_>,
    ) {
        let succeeded = job.status_code == StatusCode::Succeeded;
        // Final states have no duration; a one second marker keeps them
        // visible.
        self.record_job_span(
            conn,
            job,
            job.status_code.span_name(),
            timestamp_ns,
            timestamp_ns + 1_000_000_000,
            details,
            &[KeyValue::new("job.succeeded", succeeded)],
        );
        self.complete_job(conn, job, timestamp_ns, details);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_job_span(
        &self,
        conn: &Connection,
        job: &Job,
        name: String,
        start_ns: i64,
        end_ns: i64,
        details: &SpanDetails<'_>,
        extra: &[KeyValue],
    ) {
        let Some(cx) = self.parent_context(job) else {
            return;
        };
        if start_ns < MINIMUM_NS_TIMESTAMP || end_ns < MINIMUM_NS_TIMESTAMP {
            warn!(
                job = %job.id,
                start_ns,
                end_ns,
                "span timestamps are not in nanoseconds, skipping span"
            );
            return;
        }
        // Timer precision can be low; equal timestamps are fine but spans
        // must never run backwards.
        let end_ns = end_ns.max(start_ns);

        let mut attributes = job_attributes(conn, job, details.results);
        attributes.extend_from_slice(extra);
        let mut span = self
            .tracer
            .span_builder(name)
            .with_start_time(ns_to_system_time(start_ns))
            .with_attributes(attributes)
            .start_with_context(&self.tracer, &cx);
        decorate_span(&mut span, job, details);
        span.end_with_timestamp(ns_to_system_time(end_ns));
    }

    /// Emit the root span with the ids persisted at creation time.
    fn complete_job(
        &self,
        conn: &Connection,
        job: &Job,
        end_ns: i64,
        details: &SpanDetails<'_>,
    ) {
        let Some(cx) = self.parent_context(job) else {
            return;
        };
        let parent = cx.span().span_context().clone();
        // Start the root a microsecond before the job so it sorts first in
        // the trace.
        let start_ns = job.created_at * 1_000_000_000 - 1_000;
        let mut builder = self
            .tracer
            .span_builder("JOB")
            .with_start_time(ns_to_system_time(start_ns))
            .with_attributes(job_attributes(conn, job, details.results));
        builder.trace_id = Some(parent.trace_id());
        builder.span_id = Some(parent.span_id());
        let mut span = builder.start(&self.tracer);
        decorate_span(&mut span, job, details);
        span.end_with_timestamp(ns_to_system_time(end_ns));
    }
}

fn decorate_span(span: &mut BoxedSpan, job: &Job, details: &SpanDetails<'_>) {
    if let Some(error) = details.error {
        span.set_attribute(KeyValue::new("error.message", error.to_string()));
        // Only internal errors mark the span itself as errored
        if job.status_code == StatusCode::InternalError {
            span.set_status(Status::error(error.to_string()));
        }
    }
}

/// The stable attribute set attached to every job span, to slice and dice
/// by as needed.
pub fn job_attributes(
    conn: &Connection,
    job: &Job,
    results: Option<&JobTaskResults>,
) -> Vec<KeyValue> {
    let request = saved_request(conn, &job.rap_id);
    let string_field = |key: &str| -> String {
        request
            .as_ref()
            .and_then(|r| r.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    let orgs = request
        .as_ref()
        .and_then(|r| r.get("orgs"))
        .and_then(|v| v.as_array())
        .map(|orgs| {
            orgs.iter()
                .filter_map(|o| o.as_str())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    let mut attributes = vec![
        KeyValue::new("job.backend", job.backend.clone()),
        KeyValue::new("job.id", job.id.to_string()),
        KeyValue::new("job.rap_id", job.rap_id.clone()),
        KeyValue::new("job.workspace", job.workspace.clone()),
        KeyValue::new("job.action", job.action.clone()),
        KeyValue::new("job.commit", job.commit.clone()),
        KeyValue::new("job.run_command", job.run_command.clone()),
        KeyValue::new("job.user", string_field("created_by")),
        KeyValue::new("job.project", string_field("project")),
        KeyValue::new("job.orgs", orgs),
        KeyValue::new("job.state", job.state.as_str()),
        KeyValue::new("job.message", job.status_message.clone()),
        KeyValue::new("job.created_at", job.created_at * 1_000_000_000),
        KeyValue::new("job.status_code_updated_at", job.status_code_updated_at),
        KeyValue::new("job.requires_db", job.requires_db),
    ];
    if let Some(started_at) = job.started_at {
        attributes.push(KeyValue::new("job.started_at", started_at * 1_000_000_000));
    }
    if let Some(action_repo) = &job.action_repo_url {
        let mut reusable = action_repo.clone();
        if let Some(action_commit) = &job.action_commit {
            reusable = format!("{reusable}:{action_commit}");
        }
        attributes.push(KeyValue::new("job.reusable_action", reusable));
    }
    if let Some(results) = results {
        if let Some(exit_code) = results.exit_code {
            attributes.push(KeyValue::new("job.exit_code", exit_code));
        }
        attributes.push(KeyValue::new("job.image_id", results.image_id.clone()));
        if let Some(message) = &results.message {
            attributes.push(KeyValue::new("job.executor_message", message.clone()));
        }
        attributes.push(KeyValue::new(
            "job.action_revision",
            results.action_revision.clone(),
        ));
        attributes.push(KeyValue::new(
            "job.base_revision",
            results.base_revision.clone(),
        ));
    }
    attributes
}

fn saved_request(conn: &Connection, rap_id: &str) -> Option<serde_json::Value> {
    match queries::get_saved_rap_request(conn, rap_id) {
        Ok(request) => request,
        Err(StorageError::Locked) => None,
        Err(err) => {
            warn!(rap_id, error = %err, "failed to load saved request for tracing");
            None
        }
    }
}

#[cfg(test)]
#[path = "tracing_tests.rs"]
mod tests;
