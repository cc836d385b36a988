use std::{net::SocketAddr, sync::Arc};

use server::{build_router, load_settings, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let addr: SocketAddr = settings.bind_addr.parse()?;
    let history_capacity = settings.history_capacity;
    let app = build_router(Arc::new(AppState::new(settings)));

    info!(%addr, history_capacity, "relay listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
