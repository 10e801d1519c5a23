mod console;
mod panels;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use console::{ConsoleInput, parse_line};
use panels::{CHANNELS, ChannelParams, Panel, velocity_targets};
use telemux::interpolation::{DEFAULT_ALPHA, DEFAULT_EPSILON, DEFAULT_TICK_PERIOD_MS};
use telemux::net::{DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_RECONNECT_DELAY_MS};
use telemux::{
    ConnectionManager, Endpoint, InterpolationConfig, LinkConfig, LinkEvent, LinkHandle,
    OutboundPolicy, ReconnectPolicy, SharedInterpolator, ValueInterpolator, WsConnector,
};

type Viewer = ConnectionManager<WsConnector, ChannelParams>;

#[derive(Parser)]
#[command(name = "telemux-viewer")]
#[command(about = "Headless robot telemetry viewer")]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(short, long, help = "Defaults to 8080, or 8443 with --secure")]
    port: Option<u16>,

    #[arg(long, help = "Use wss://")]
    secure: bool,

    #[arg(long, help = "Full ws:// or wss:// URL, overrides host, port and --secure")]
    url: Option<String>,

    #[arg(long, default_value_t = DEFAULT_TICK_PERIOD_MS, help = "Gauge interpolation tick in ms")]
    tick_ms: u64,

    #[arg(long, default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    reconnect_ms: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECT_DELAY_MS)]
    max_reconnect_ms: u64,

    #[arg(long, help = "Resend console frames typed while offline on reconnect")]
    replay: bool,

    #[arg(long, default_value_t = 1000, help = "Gauge readout interval in ms, 0 disables")]
    gauge_ms: u64,
}

impl Args {
    fn endpoint(&self) -> Result<Endpoint> {
        if let Some(url) = &self.url {
            return url
                .parse()
                .with_context(|| format!("invalid --url {}", url));
        }

        let endpoint = Endpoint::for_page(self.secure, self.host.as_str());
        Ok(match self.port {
            Some(port) => Endpoint::new(endpoint.scheme(), endpoint.host(), port),
            None => endpoint,
        })
    }

    fn link_config(&self) -> Result<LinkConfig> {
        let config = LinkConfig {
            endpoint: self.endpoint()?,
            reconnect: ReconnectPolicy::Exponential {
                initial: Duration::from_millis(self.reconnect_ms),
                max: Duration::from_millis(self.max_reconnect_ms.max(self.reconnect_ms)),
                factor: 2.0,
            },
            outbound: if self.replay {
                OutboundPolicy::ReplayOnConnect
            } else {
                OutboundPolicy::Hold
            },
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn interpolation_config(&self) -> InterpolationConfig {
        InterpolationConfig {
            alpha: DEFAULT_ALPHA,
            epsilon: DEFAULT_EPSILON,
            tick_period: Duration::from_millis(self.tick_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.link_config()?;
    let endpoint = config.endpoint.clone();
    let outbound = config.outbound;

    let interpolator =
        SharedInterpolator::new(ValueInterpolator::new(args.interpolation_config())?);
    interpolator.track("vx", 0.0);
    interpolator.track("va", 0.0);
    let ticker = interpolator.spawn_ticker();

    let mut viewer: Viewer = ConnectionManager::new(config, WsConnector)?;
    register_panels(&viewer, &interpolator);
    watch_lifecycle(&viewer, outbound);

    log::info!("Viewer started for {}", endpoint);
    viewer.start();

    let console = tokio::spawn(run_console(viewer.handle()));
    let gauges = (args.gauge_ms > 0).then(|| {
        tokio::spawn(report_gauges(
            interpolator.clone(),
            Duration::from_millis(args.gauge_ms),
        ))
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    log::info!("Viewer shutting down");
    viewer.shutdown();
    viewer.join().await;

    console.abort();
    ticker.abort();
    if let Some(gauges) = gauges {
        gauges.abort();
    }
    Ok(())
}

fn register_panels(viewer: &Viewer, interpolator: &SharedInterpolator) {
    for (channel, params) in CHANNELS {
        let interpolator = interpolator.clone();
        viewer.register_channel(channel, params, move |channel, data, params| {
            if params.panel == Panel::Velocity {
                let (vx, va) = velocity_targets(channel, data)?;
                interpolator.set_target("vx", vx);
                interpolator.set_target("va", va);
            }
            let readout = params.panel.render(channel, data)?;
            log::info!("{}: {}", params.label, readout);
            Ok(())
        });
    }
}

fn watch_lifecycle(viewer: &Viewer, outbound: OutboundPolicy) {
    viewer.events().subscribe(move |event| match event {
        LinkEvent::Connected => log::info!("Telemetry link up"),
        LinkEvent::Disconnected if outbound == OutboundPolicy::Hold => {
            log::warn!("Telemetry link down, console frames are held until :resend")
        }
        LinkEvent::Disconnected => log::warn!("Telemetry link down"),
        LinkEvent::Reconnect => log::info!("Telemetry link retrying"),
        LinkEvent::Connect => {}
    });
}

async fn run_console(handle: LinkHandle<ChannelParams>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = match parse_line(&line) {
            None => continue,
            Some(Ok(input)) => input,
            Some(Err(e)) => {
                log::warn!("Ignoring console input: {}", e);
                continue;
            }
        };

        match input {
            ConsoleInput::Send(frame) => {
                if !handle.send(frame) {
                    break;
                }
            }
            ConsoleInput::Resend => {
                let pending = handle.take_pending().await;
                log::info!("Resending {} held frame(s)", pending.len());
                for frame in pending {
                    handle.send(frame);
                }
            }
            ConsoleInput::Stats => log::info!("{:?}", handle.stats()),
            ConsoleInput::State => log::info!("Link is {}", handle.state().as_str()),
        }
    }

    Ok(())
}

async fn report_gauges(interpolator: SharedInterpolator, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let vx = interpolator.current("vx").unwrap_or_default();
        let va = interpolator.current("va").unwrap_or_default();
        log::debug!("Gauges vx={:.2} m/s va={:.0} deg/s", vx, va);
    }
}
