use anyhow::Context;
use remote::{AppState, RemoteServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    utils::log::init_tracing("remote=info,tower_http=info").context("failed to install tracing")?;

    let config = RemoteServerConfig::from_env().context("failed to read remote server config")?;
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "local backend listening");

    remote::serve(listener, AppState::new(config)).await?;
    Ok(())
}
