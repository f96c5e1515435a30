use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use httpgauge::cli::CliArgs;
use httpgauge::config::{GaugeConfig, LoggingConfig};
use httpgauge::gauge::{describe_metrics, Gauge};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration from file if given, then environment, then flags
    let mut config =
        GaugeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply_to(&mut config)?;

    init_logging(&config.logging);

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let settings = config
        .gauge_settings()
        .context("Invalid benchmark configuration")?;

    if config.metrics.enabled {
        let listen_addr = config.metrics_addr()?;

        // Install Prometheus exporter
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        builder
            .with_http_listener(listen_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        describe_metrics();

        info!(metrics_addr = %listen_addr, "Prometheus metrics server started");
    }

    info!("Starting httpgauge v{}", env!("CARGO_PKG_VERSION"));

    let mut gauge = Gauge::new(settings);
    let report = match gauge.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Benchmark aborted");
            return Err(e).context("Benchmark aborted before completion");
        }
    };

    if config.report.format == "json" {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
    }

    Ok(())
}

/// Initialize structured logging on stderr so the report owns stdout
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
