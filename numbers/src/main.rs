use aggregator::config::Listener;
use clap::Parser;
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;

const METRICS_PREFIX: &str = "numbers";

/// Serves `/numbers`, merging the numbers published by the upstreams given in `u`.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address as `host:port` or `:port`, overrides the config file
    #[arg(long = "http-addr")]
    http_addr: Option<Listener>,

    /// Log at debug level when RUST_LOG is not set
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(listener) = cli.http_addr {
        config.aggregator.listener = listener;
    }

    // Sentry must be initialized before the runtime starts.
    let _sentry = init_logging(cli.verbose, config.common.logging.as_ref());

    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    tracing::info!(
        host = %config.aggregator.listener.host,
        port = config.aggregator.listener.port,
        request_timeout_ms = config.aggregator.request_timeout_ms,
        "Starting numbers service"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(aggregator::run(config.aggregator))?;

    Ok(())
}

fn init_logging(
    verbose: bool,
    logging: Option<&LoggingConfig>,
) -> Option<sentry::ClientInitGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let sentry_guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = sentry_guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    sentry_guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), Box<dyn Error>> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| "metrics recorder already installed")?;

    shared::metrics_defs::describe_all(aggregator::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Sending metrics to statsd"
    );

    Ok(())
}
