use anyhow::{Context, Result};
use opentelemetry::sdk::resource::{EnvResourceDetector, SdkProvidedResourceDetector};
use opentelemetry::sdk::{trace as sdktrace, Resource};
use opentelemetry_otlp::{HasExportConfig, WithExportConfig};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

fn init_tracer() -> Result<sdktrace::Tracer> {
    let mut exporter = opentelemetry_otlp::new_exporter().tonic().with_env();

    // stdout belongs to the kiosk screen
    eprintln!(
        "Using opentelemetry endpoint {}",
        exporter.export_config().endpoint
    );

    std::env::set_var("OTEL_SERVICE_NAME", env!("CARGO_PKG_NAME"));

    let resource = Resource::from_detectors(
        Duration::from_secs(0),
        vec![
            Box::new(EnvResourceDetector::new()),
            Box::new(SdkProvidedResourceDetector),
        ],
    );

    Ok(opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(opentelemetry::runtime::Tokio)?)
}

/// Logs go to stderr. Spans are also exported over OTLP when an endpoint is configured.
pub fn init_tracing() -> Result<()> {
    let otel = match std::env::var_os(OTLP_ENDPOINT_VAR) {
        Some(_) => {
            let tracer = init_tracer().context("Setting up the opentelemetry exporter")?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let default = concat!(env!("CARGO_CRATE_NAME"), "=info")
        .parse()
        .expect("hard-coded default directive should be valid");

    Registry::default()
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default)
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::Layer::new().with_writer(std::io::stderr))
        .with(otel)
        .init();

    Ok(())
}

pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
