use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use warden_rcon::RconConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: String,
    pub state_dir: PathBuf,
    pub rcon: RconConfig,
    pub bus_capacity: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr =
            std::env::var("WARDEN_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8087".to_string());
        let state_dir = std::env::var("WARDEN_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("state"));
        let rcon_addr =
            std::env::var("WARDEN_RCON_ADDR").unwrap_or_else(|_| "127.0.0.1:25575".to_string());
        let rcon_password =
            std::env::var("WARDEN_RCON_PASSWORD").context("WARDEN_RCON_PASSWORD is required")?;
        let mut rcon = RconConfig::new(rcon_addr, rcon_password);
        if let Some(ms) = std::env::var("WARDEN_RCON_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            rcon.timeout = Duration::from_millis(ms);
        }
        let bus_capacity = std::env::var("WARDEN_BUS_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256);
        Ok(Self {
            http_addr,
            state_dir,
            rcon,
            bus_capacity,
        })
    }
}
