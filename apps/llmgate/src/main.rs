use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use llmgate_core::bootstrap::CliArgs;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Startup validation failures propagate out of main as a non-zero exit.
    let boot = llmgate_core::bootstrap::bootstrap(args).await?;
    let engine = Arc::new(boot.engine);
    let config = engine.state().config.load_full();

    let app = llmgate_router::gateway_router(engine.clone());

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    // Stop the background drain worker once the server is down.
    boot.activity_worker.abort();
    Ok(())
}
