use anyhow::Context;
use clap::Parser;
use signal_relay::{cli::Cli, router, CoreClient, RelayAgent, RelayConfig, WebSocketConnector};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_relay=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config =
        RelayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(bind) = cli.bind {
        config.connection.ip = bind;
    }

    info!("Starting signal relay {}", config.id);

    // Bind first so an OS-assigned port is known before anything advertises it
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    let addr = listener.local_addr()?;
    config.connection.port = addr.port();

    let platform = Arc::new(CoreClient::new(config.core_url())?);
    info!("Platform core at {}", platform.base_url());

    let agent = Arc::new(RelayAgent::new(
        config,
        platform,
        Arc::new(WebSocketConnector),
    ));
    let app = router(Arc::clone(&agent));

    info!("Listening on http://{}", addr);
    info!("Stream endpoint: ws://{}/stream/{{signal_name}}", addr);
    info!("Health endpoint: http://{}/health", addr);

    let shutdown = agent.shutdown_token();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    agent.shutdown().await;
    info!("Signal relay stopped");

    Ok(())
}

/// Resolves on Ctrl+C and cancels `token` so open client streams close
async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        // Without a signal handler the server runs until killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    token.cancel();
}
