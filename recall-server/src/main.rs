use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use recall_config::ENV_CONFIG;
use recall_server::router;
use recall_telemetry::{LogFormat, init_tracing};

/// Context retrieval and generation service.
#[derive(Debug, Parser)]
#[command(name = "recall-server", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, short, env = ENV_CONFIG)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = recall_config::load(args.config.as_deref(), |key| std::env::var(key).ok())
        .context("failed to load configuration")?;

    let format = if config.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, &config.logging.filter)?;

    let addr = config.server.bind_addr()?;
    let services = recall_server::build(&config)?;
    let app = router(services.state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "recall server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("draining background work");
    services.shutdown(config.server.shutdown_grace()).await;
    info!("recall server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
