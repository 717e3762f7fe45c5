//! OpenTelemetry-backed metrics for the dispatcher.
//!
//! Instruments (all recorded through [`MetricsSink`]):
//! * `portico_requests_total` (counter; `method`, `route`, `status`)
//! * `portico_request_duration_seconds` (histogram; `method`, `route`, `status`)
//! * `portico_stage_duration_seconds` (histogram; `stage`)
//! * `portico_requests_started_total` (counter; `method`)
use std::time::Duration;

use eyre::{Result, WrapErr};
use http::{Method, StatusCode};
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter, MeterProvider},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};
use tracing::info;

use crate::{
    config::models::MetricsConfig,
    ports::{handler::Stage, hooks::MetricsSink},
};

pub const PORTICO_REQUESTS_TOTAL: &str = "portico_requests_total";
pub const PORTICO_REQUESTS_STARTED_TOTAL: &str = "portico_requests_started_total";
pub const PORTICO_REQUEST_DURATION_SECONDS: &str = "portico_request_duration_seconds";
pub const PORTICO_STAGE_DURATION_SECONDS: &str = "portico_stage_duration_seconds";

/// Route label for requests that never matched an endpoint. Keeps label
/// cardinality bounded by the number of registered routes.
const UNMATCHED_ROUTE: &str = "unmatched";

/// [`MetricsSink`] recording into OpenTelemetry instruments.
#[derive(Clone)]
pub struct OtelMetrics {
    requests_started: Counter<u64>,
    requests_total: Counter<u64>,
    request_duration: Histogram<f64>,
    stage_duration: Histogram<f64>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            requests_started: meter
                .u64_counter(PORTICO_REQUESTS_STARTED_TOTAL)
                .with_description("Requests accepted by the dispatcher.")
                .build(),
            requests_total: meter
                .u64_counter(PORTICO_REQUESTS_TOTAL)
                .with_description("Requests answered by the dispatcher.")
                .build(),
            request_duration: meter
                .f64_histogram(PORTICO_REQUEST_DURATION_SECONDS)
                .with_description("Time from request arrival to the end of the hooks.")
                .with_unit("s")
                .build(),
            stage_duration: meter
                .f64_histogram(PORTICO_STAGE_DURATION_SECONDS)
                .with_description("Time spent in each dispatch stage.")
                .with_unit("s")
                .build(),
        }
    }

    /// Instruments on the `portico` meter of `provider`.
    pub fn from_provider(provider: &SdkMeterProvider) -> Self {
        Self::new(&provider.meter("portico"))
    }
}

impl MetricsSink for OtelMetrics {
    fn request_started(&self, method: &Method) {
        self.requests_started
            .add(1, &[KeyValue::new("method", method.as_str().to_string())]);
    }

    fn stage_completed(&self, stage: Stage, elapsed: Duration) {
        self.stage_duration
            .record(elapsed.as_secs_f64(), &[KeyValue::new("stage", stage.as_str())]);
    }

    fn request_completed(
        &self,
        method: &Method,
        route: Option<&str>,
        status: StatusCode,
        elapsed: Duration,
    ) {
        let attributes = [
            KeyValue::new("method", method.as_str().to_string()),
            KeyValue::new("route", route.unwrap_or(UNMATCHED_ROUTE).to_string()),
            KeyValue::new("status", i64::from(status.as_u16())),
        ];
        self.requests_total.add(1, &attributes);
        self.request_duration
            .record(elapsed.as_secs_f64(), &attributes);
    }
}

/// Build the meter provider described by `config`.
///
/// Without an OTLP endpoint the provider has no reader: instruments work but
/// nothing is exported. Must be called from within a tokio runtime when an
/// endpoint is set.
pub fn init_metrics(config: &MetricsConfig) -> Result<SdkMeterProvider> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();
    let builder = SdkMeterProvider::builder().with_resource(resource);

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .build()
                .wrap_err_with(|| format!("Failed to build OTLP metric exporter for {endpoint}"))?;
            let interval = humantime::parse_duration(&config.export_interval).wrap_err_with(|| {
                format!("Invalid metrics export_interval '{}'", config.export_interval)
            })?;
            let reader = PeriodicReader::builder(exporter)
                .with_interval(interval)
                .build();
            info!("Exporting metrics to {} every {:?}", endpoint, interval);
            builder.with_reader(reader).build()
        }
        None => {
            info!("Metrics enabled without an exporter");
            builder.build()
        }
    };

    Ok(provider)
}

/// Flush and stop `provider`.
pub fn shutdown_metrics(provider: &SdkMeterProvider) -> Result<()> {
    provider
        .shutdown()
        .wrap_err("Failed to shut down the meter provider")
}
