use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tunnel_protocol::DEFAULT_SERVER_PORT;
use tunnel_server::{SessionDirectory, router};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(DEFAULT_SERVER_PORT);
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));

    let directory = Arc::new(SessionDirectory::default());
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;

    tracing::info!(%bind_addr, "Signalling server started");
    axum::serve(listener, router(directory))
        .await
        .context("Server error")?;

    Ok(())
}
