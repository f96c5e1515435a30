use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use httpgauge::origin::{OriginOptions, TestOriginServer};

/// Local HTTP origin for benchmarking httpgauge itself
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Response body size in bytes
    #[arg(long, default_value_t = 1024)]
    body_size: usize,

    /// Close keep-alive connections after this many requests
    #[arg(long)]
    max_requests_per_connection: Option<u64>,

    /// Delay before each response, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Reset every connection instead of answering
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "httpgauge=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    let options = OriginOptions {
        body_size: args.body_size,
        max_requests_per_connection: args.max_requests_per_connection,
        response_delay: args.delay_ms.map(Duration::from_millis),
        reset_connections: args.reset,
    };

    let server = TestOriginServer::bind(args.listen, options)
        .await
        .with_context(|| format!("Failed to bind test origin on {}", args.listen))?;

    info!("Starting test origin server");
    server.run().await?;
    Ok(())
}
