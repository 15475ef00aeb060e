use crate::config::{LogFormat, TelemetryConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initializes tracing and, when enabled, the Prometheus scrape endpoint.
///
/// Log output goes to stderr; stdout is reserved for the emitted document
/// stream.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        describe_metrics();

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint listening on /metrics"
        );
    }

    Ok(())
}

/// Registers descriptions for every metric the connectors emit, so the
/// scrape output is self-documenting.
fn describe_metrics() {
    metrics::describe_counter!(
        "connector_documents_emitted",
        "Documents written to the sink"
    );
    metrics::describe_counter!(
        "connector_attachments_emitted",
        "Attachments written to the sink"
    );
    metrics::describe_counter!(
        "connector_content_skipped",
        "Content downloads declined by the fetch gate"
    );
    metrics::describe_counter!("connector_download_errors", "Content downloads that failed");
    metrics::describe_counter!("connector_rate_limit_waits", "Rate-limited responses waited out");
    metrics::describe_counter!("connector_pages_fetched", "Listing pages fetched from a source");
    metrics::describe_histogram!(
        "connector_fetch_duration_ms",
        "Duration of a single content download in milliseconds"
    );
}

pub fn shutdown() {
    tracing::info!("Shutting down telemetry");
}
