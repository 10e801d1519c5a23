mod config;
mod events;
mod server;
mod simulation;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;

use config::{RelayConfig, write_viewer_config};
use events::RelayEvent;
use server::Relay;
use simulation::publish_simulated;

#[derive(Parser)]
#[command(name = "telemux-relay")]
#[command(about = "WebSocket telemetry relay")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value_t = telemux::net::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, help = "Publish simulated robot telemetry")]
    simulate: bool,

    #[arg(long, default_value_t = 100, help = "Simulation interval in ms")]
    interval_ms: u64,

    #[arg(long, help = "Write the viewer port config to this JSON file")]
    viewer_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = RelayConfig {
        host: args.host,
        port: args.port,
        max_clients: args.max_clients,
        simulate: args
            .simulate
            .then(|| Duration::from_millis(args.interval_ms.max(1))),
        viewer_config: args.viewer_config,
        ..Default::default()
    };

    let (relay, mut events) = Relay::bind(config.clone()).await?;
    let addr = relay.local_addr()?;

    if let Some(path) = &config.viewer_config {
        write_viewer_config(path, addr.port())?;
        log::info!("Wrote viewer config to {}", path.display());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(interval) = config.simulate {
        log::info!("Simulating telemetry every {:?}", interval);
        tokio::spawn(publish_simulated(
            interval,
            relay.publisher(),
            shutdown_rx.clone(),
        ));
    }

    let server = tokio::spawn(relay.run(shutdown_rx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            Some(event) = events.recv() => log_event(event),
        }
    }

    log::info!("Relay shutting down");
    shutdown_tx.send_replace(true);
    server.await?;

    while let Ok(event) = events.try_recv() {
        log_event(event);
    }
    Ok(())
}

fn log_event(event: RelayEvent) {
    match event {
        RelayEvent::Listening { addr } => log::info!("Relay listening on {}", addr),
        RelayEvent::ClientConnected { client_id, addr } => {
            log::info!("Client {} connected from {}", client_id, addr)
        }
        RelayEvent::ClientDisconnected { client_id, reason } => {
            log::info!("Client {} {}", client_id, reason.as_str())
        }
        RelayEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection from {} denied: {}", addr, reason)
        }
        RelayEvent::ClientLagged { client_id, skipped } => {
            log::warn!("Client {} fell behind, skipped {} frame(s)", client_id, skipped)
        }
        RelayEvent::Error { message } => log::error!("{}", message),
    }
}
