// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide logging and trace-export setup for the controller binary.

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the fmt subscriber (env-filtered) and, when an OTLP endpoint is
/// configured, the span exporter. Without an endpoint the global tracer
/// provider stays a no-op and span recording costs nothing.
pub fn init(service_name: &'static str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    global::set_text_map_propagator(TraceContextPropagator::new());

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return;
    };
    match SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.clone())
        .build()
    {
        Ok(exporter) => {
            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    Resource::builder()
                        .with_service_name(service_name)
                        .build(),
                )
                .build();
            // Force creation of the named tracer so provider wiring errors
            // surface at startup rather than first span
            let _ = provider.tracer(service_name);
            global::set_tracer_provider(provider);
            info!(endpoint, "OTLP span export enabled");
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to build OTLP span exporter");
        }
    }
}
