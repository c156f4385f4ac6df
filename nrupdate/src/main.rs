mod config;
mod telemetry;

use clap::Parser;
use config::{Args, Settings};
use reconciler::forwarder_config::ConfigError;
use reconciler::store::StoreError;
use reconciler::{
    ConfigStore, FilesystemConfigStore, PgConnector, ReconcileSettings, Reconciler, Runner,
    RunnerError,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error(transparent)]
    Cli(#[from] config::CliError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Run(#[from] RunnerError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("interrupted")]
    Interrupted,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // The sentry client has to exist before the runtime spawns any threads.
    let sentry_guard = match telemetry::init_sentry(args.sentry_dsn.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    telemetry::init_logging(&args.log_filter, sentry_guard.is_some());

    info!(
        target_host = args.target_host.as_deref().unwrap_or_default(),
        config = ?args.config,
        route_mode = %args.route_mode,
        "CLI Args"
    );

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "nrupdate failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), AppError> {
    let settings = args.validate()?;

    if let Err(e) = telemetry::init_metrics(args.statsd_host.as_deref(), args.statsd_port) {
        warn!(error = %e, "Metrics disabled");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(settings))
}

async fn run_async(settings: Settings) -> Result<(), AppError> {
    let store = Arc::new(FilesystemConfigStore::new(&settings.config_path));
    let config = store.load()?;

    let connector = PgConnector::from_env(settings.connect_timeout, settings.statement_timeout)?;
    let reconciler = Reconciler::new(
        connector,
        store,
        ReconcileSettings {
            target: settings.target,
            route_mode: settings.route_mode,
        },
    );
    let runner = Runner::new(reconciler, config);

    let finished = runner.start()?;
    let result = tokio::select! {
        result = finished => result.unwrap_or(Err(RunnerError::Stopped)).map_err(AppError::from),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping");
            Err(AppError::Interrupted)
        }
    };
    runner.stop().await;

    result.map(|_| ())
}
