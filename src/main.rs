use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use zipline::{Config, Server, download, server};

/// Streams zip archives of directories over HTTP.
#[derive(Debug, Parser)]
#[command(name = "zipline", version, about, long_about = None)]
struct Args {
    /// Directory whose subdirectories are served as archives.
    #[arg(short = 'd', long, default_value = "test_photos")]
    directory: PathBuf,

    /// Seconds to pause between streamed chunks (0 disables pacing).
    #[arg(long, default_value_t = 0.2)]
    latency: f64,

    /// Log level filter, overridden by RUST_LOG when set.
    #[arg(short = 'l', long, default_value = "info")]
    log: String,

    /// HTML file served at /.
    #[arg(long, default_value = "index.html")]
    index: PathBuf,

    /// Listen address.
    #[arg(short = 'a', long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), zipline::Error> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(Config {
        root: args.directory,
        pace: Duration::from_secs_f64(args.latency.max(0.0)),
        index: args.index,
        addr: args.addr,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let router = download::router(Arc::clone(&config), shutdown_rx.clone());
    Server::bind(config.addr).await?.serve(router, shutdown_rx).await
}
