use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use argus_core::{Agent, AgentConfig};
use argus_web::create_app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::load()?;
    let port = config.port;

    let agent = Arc::new(Agent::new(config)?);

    // The monitoring loop runs for the life of the process.
    let monitor = agent.monitor.clone();
    let monitor_task = tokio::spawn(async move {
        monitor.run().await;
    });

    let app = create_app(agent.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "argus agent listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    agent.monitor.stop().await;
    let _ = monitor_task.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
