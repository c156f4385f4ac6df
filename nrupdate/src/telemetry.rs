use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid sentry DSN: {0}")]
    InvalidDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not create statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("could not install metrics recorder: {0}")]
    Recorder(String),
}

pub fn init_sentry(dsn: Option<&str>) -> Result<Option<sentry::ClientInitGuard>, TelemetryError> {
    let Some(dsn) = dsn.filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn.parse()?),
        release: sentry::release_name!(),
        ..Default::default()
    });
    Ok(Some(guard))
}

/// Installs the global subscriber. Error events are forwarded to sentry when
/// a client is active.
pub fn init_logging(filter: &str, with_sentry: bool) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(with_sentry.then(sentry::integrations::tracing::layer))
        .init();
}

pub fn init_metrics(host: Option<&str>, port: u16) -> Result<(), TelemetryError> {
    let Some(host) = host.filter(|h| !h.is_empty()) else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(host, port).build(None)?;
    metrics::set_global_recorder(recorder).map_err(|e| TelemetryError::Recorder(e.to_string()))?;
    reconciler::metrics_defs::describe_all();

    tracing::info!(host, port, "Sending metrics to statsd");
    Ok(())
}
