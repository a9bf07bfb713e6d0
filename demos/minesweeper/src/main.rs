mod api;
mod board;

use tracing_subscriber::EnvFilter;
use wsmux::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("WSMUX_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());

    let server = Server::builder()
        .bind(&addr)
        .subprotocol(api::subprotocol()?)?
        .default_subprotocol(api::SUBPROTOCOL)
        .build()
        .await?;

    tracing::info!(addr = %server.local_addr()?, "minesweeper server listening");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
