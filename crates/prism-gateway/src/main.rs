use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use prism_gateway::security::check_public_bind_allowed;
use prism_gateway::{app, AppState, GatewayConfig, WebRtcEngine};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = GatewayConfig::parse();
    prism_common::init_tracing_with_default(&config.log_level);

    let addr = config.bind_addr();
    check_public_bind_allowed(addr, config.allow_public_bind)?;

    let engine = Arc::new(WebRtcEngine::new(config.ice_servers.clone()));
    let state = AppState::new(engine);
    let router = app(state.clone(), &config.public_dir);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback_addr = SocketAddr::new(addr.ip(), 0);
            warn!(
                "gateway bind {} is already in use, falling back to {}",
                addr, fallback_addr
            );
            TcpListener::bind(fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };
    info!("prism gateway listening on http://{}", listener.local_addr()?);
    info!("serving assets from {}", config.public_dir.display());

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let closed = state.calls.close_all().await;
    info!("prism gateway stopped ({} calls closed)", closed);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
