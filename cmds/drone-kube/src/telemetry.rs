//! Logging and trace export.

use std::io::IsTerminal;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{
	ExporterBuildError, SpanExporter, OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_PROTOCOL,
	OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
};
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use thiserror::Error;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

const SERVICE_NAME: &str = "drone-kube";

#[derive(Debug, Error)]
pub enum TelemetryError {
	#[error("unable to build span exporter")]
	Exporter(#[from] ExporterBuildError),

	#[error("a global subscriber is already installed")]
	Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps trace export alive; pending spans are flushed when dropped.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("Failed to shutdown tracer provider: {e}");
			}
		}
	}
}

/// Install the global subscriber.
///
/// `log_level` (the `--log-level` flag) wins over `RUST_LOG`; with neither,
/// `info` is used. Logs go to stderr, pretty on a terminal and JSON lines
/// otherwise. Spans are exported over OTLP only when an OTLP endpoint is
/// configured through the standard `OTEL_*` variables.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard, TelemetryError> {
	let tracer_provider = if otlp_configured() {
		Some(tracer_provider()?)
	} else {
		None
	};

	let otel_layer = tracer_provider.as_ref().map(|provider| {
		tracing_opentelemetry::layer()
			.with_error_records_to_exceptions(true)
			.with_tracer(provider.tracer(SERVICE_NAME))
	});

	tracing_subscriber::registry()
		.with(filter(log_level))
		.with(fmt_layer())
		.with(otel_layer)
		.try_init()?;

	Ok(TelemetryGuard { tracer_provider })
}

fn otlp_configured() -> bool {
	std::env::var_os(OTEL_EXPORTER_OTLP_ENDPOINT).is_some()
		|| std::env::var_os(OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_some()
}

fn filter(log_level: Option<Level>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	}
}

fn fmt_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
	S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
	let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	if std::io::stderr().is_terminal() {
		layer.pretty().boxed()
	} else {
		layer.json().boxed()
	}
}

fn tracer_provider() -> Result<SdkTracerProvider, TelemetryError> {
	// OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES are read by the builder
	let mut resource = Resource::builder();
	if std::env::var_os("OTEL_SERVICE_NAME").is_none() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let protocol = std::env::var(OTEL_EXPORTER_OTLP_PROTOCOL)
		.unwrap_or_else(|_| OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT.to_string());
	let exporter = if protocol == "grpc" {
		SpanExporter::builder().with_tonic().build()?
	} else {
		SpanExporter::builder().with_http().build()?
	};

	let provider = SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build();
	opentelemetry::global::set_tracer_provider(provider.clone());
	Ok(provider)
}
