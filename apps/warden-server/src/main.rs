mod api;
mod config;

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, EnvFilter};
use warden_engine::Engine;
use warden_events::Bus;
use warden_rcon::{RconAllowlist, RemoteAllowlist};
use warden_store::RequestStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cfg = config::ServerConfig::from_env()?;
    std::fs::create_dir_all(&cfg.state_dir)?;
    let store = RequestStore::open(&cfg.state_dir)?;
    let remote: Arc<dyn RemoteAllowlist> = Arc::new(RconAllowlist::new(cfg.rcon.clone()));
    let bus = Bus::new(cfg.bus_capacity);
    let engine = Arc::new(Engine::new(store, remote, bus.clone()));

    // Mirror bus traffic into the log; the real front-end subscribes
    // to the same bus for rendering.
    tokio::spawn({
        let mut rx = bus.subscribe();
        async move {
            loop {
                match rx.recv().await {
                    Ok(env) => {
                        tracing::info!(target: "warden-events", kind = %env.kind, payload = %env.payload, "event");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "warden-events", skipped, "event log lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    let app = api::router(api::AppState { engine });
    let listener = tokio::net::TcpListener::bind(&cfg.http_addr).await?;
    tracing::info!(addr = %cfg.http_addr, rcon = %cfg.rcon.addr, "warden-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
