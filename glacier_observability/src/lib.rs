//! Logging, tracing and metrics setup shared by the glacier crates.
//!
//! Libraries only use the `tracing` macros and [`meter`]; the binary calls
//! [`init_observability`] once at startup.
//!
//! Environment:
//!
//! - `RUST_LOG`: log filter, defaults to `info`.
//! - `RUST_LOG_FORMAT=json`: emit JSON lines instead of human readable logs.
//! - `OTEL_SDK_DISABLED=false`: export traces and metrics over OTLP. Export is
//!   disabled unless explicitly enabled.

use std::borrow::Cow;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{InstrumentationScope, global};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader};
use opentelemetry_sdk::trace::SdkTracerProvider;
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::{prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

pub use crate::error_kind::ErrorKind;

mod error_kind;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const DEFAULT_LOG_FILTER: &str = "info";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("Failed to build OTLP exporter"))]
    Exporter { source: ExporterBuildError },
    #[snafu(display("Failed to install global subscriber"))]
    Subscriber {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Returns a meter from the global meter provider.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Installs the global tracing subscriber and meter provider.
pub fn init_observability(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
) -> Result<(), ObservabilityError> {
    let export_enabled = std::env::var(OTEL_SDK_DISABLED)
        .map(|v| v == "false")
        .unwrap_or(false);

    let otel_layer = otel(package_name, package_version, export_enabled)?;

    tracing_subscriber::registry()
        .with(vec![stdout(), otel_layer])
        .try_init()
        .context(SubscriberSnafu {})
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn stdout<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let json_fmt = std::env::var("RUST_LOG_FORMAT")
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(env_filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_filter(env_filter())
            .boxed()
    }
}

fn otel<S>(
    package_name: impl Into<Cow<'static, str>>,
    version: impl Into<Cow<'static, str>>,
    export_enabled: bool,
) -> Result<BoxedLayer<S>, ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = Resource::builder().build();

    let scope = InstrumentationScope::builder(package_name.into())
        .with_version(version.into())
        .build();

    let mut trace_provider = SdkTracerProvider::builder().with_resource(resource.clone());
    let mut meter_provider = MeterProviderBuilder::default().with_resource(resource);

    if export_enabled {
        let span_exporter = SpanExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu {})?;
        trace_provider = trace_provider.with_batch_exporter(span_exporter);

        let metrics_exporter = MetricExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu {})?;
        let metrics_reader = PeriodicReader::builder(metrics_exporter)
            .with_interval(METRICS_EXPORT_INTERVAL)
            .build();
        meter_provider = meter_provider.with_reader(metrics_reader);
    }

    let tracer = trace_provider.build().tracer_with_scope(scope);
    let meter_provider = meter_provider.build();

    global::set_meter_provider(meter_provider.clone());

    let layer = env_filter()
        .and_then(MetricsLayer::new(meter_provider))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed();

    Ok(layer)
}
