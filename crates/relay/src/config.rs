use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use telemux::net::DEFAULT_PORT;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    /// Frames a slow client may fall behind before it starts losing them.
    pub client_backlog: usize,
    /// Generate simulated telemetry at this interval.
    pub simulate: Option<Duration>,
    /// Where to write `{"WEBSOCKET_PORT": port}` for viewers.
    pub viewer_config: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_clients: 32,
            client_backlog: 256,
            simulate: None,
            viewer_config: None,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Tells browser viewers served next to the relay which port to dial.
pub fn write_viewer_config(path: &Path, port: u16) -> Result<()> {
    let config = serde_json::to_string_pretty(&json!({ "WEBSOCKET_PORT": port }))?;
    fs::write(path, config)
        .with_context(|| format!("failed to write viewer config {}", path.display()))
}
