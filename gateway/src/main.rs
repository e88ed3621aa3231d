use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod config;

#[derive(Parser)]
enum CliCommand {
    /// Serve envelope calls until the process is stopped
    Run(ConfigArgs),
    /// Load and validate the config file, then exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Bridge(#[from] bridge::errors::BridgeError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Run(args) => run(&args.config_path),
        CliCommand::Validate(args) => Config::from_file(&args.config_path)
            .map(|_| println!("{} is valid", args.config_path.display()))
            .map_err(GatewayError::from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gateway: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &std::path::Path) -> Result<(), GatewayError> {
    let config = Config::from_file(config_path)?;

    let sentry_guard = config.sentry_dsn().map(|dsn| {
        sentry::init(sentry::ClientOptions {
            dsn: dsn.parse().ok(),
            release: sentry::release_name!(),
            ..Default::default()
        })
    });
    init_logging(&config.logging(), sentry_guard.is_some());

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(bridge::run(config.bridge))?;
    Ok(())
}

fn init_logging(logging: &LoggingConfig, with_sentry: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(with_sentry.then(sentry::integrations::tracing::layer))
        .init();
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), GatewayError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("bridge"))
        .map_err(|e| GatewayError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| GatewayError::Metrics("a metrics recorder is already installed".into()))?;
    shared::metrics_defs::describe_all(bridge::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "Reporting metrics to statsd"
    );
    Ok(())
}
