//! Toolbridge server binary: load config, assemble the core service, and
//! serve the status/invoke surface.

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use toolbridge_core::service::ServiceFactory;
use toolbridge_core::{config, status};

#[derive(Parser, Debug)]
#[command(
    name = "toolbridge",
    about = "Adapt declarative HTTP APIs into MCP tool definitions"
)]
struct Args {
    /// Path to the JSON or YAML config file.
    #[arg(long)]
    config: PathBuf,

    /// Bind address for the status/invoke surface.
    #[arg(long, default_value = "127.0.0.1:8090")]
    bind: String,

    /// Log level filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = config::load_config(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    let service =
        Arc::new(ServiceFactory::create_core_service(config).context("create core service")?);

    // Surface connection events in the logs.
    let mut events = service.connection_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(
                server = %event.server_id,
                kind = ?event.kind,
                error = event.error.as_deref().unwrap_or(""),
                "connection event"
            );
        }
    });

    service.connect_all().await;

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "toolbridge listening");

    axum::serve(listener, status::router(service.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    service.shutdown();
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
