use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use telemux::net::decode_frame;

use crate::config::RelayConfig;
use crate::events::{DisconnectReason, RelayEvent};

/// Fans every telemetry frame out to all connected viewers.
pub struct Relay {
    listener: TcpListener,
    config: RelayConfig,
    frames: broadcast::Sender<String>,
    events: mpsc::UnboundedSender<RelayEvent>,
    next_client_id: u32,
}

struct Client {
    id: u32,
    addr: SocketAddr,
    frames: broadcast::Sender<String>,
    feed: broadcast::Receiver<String>,
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl Relay {
    pub async fn bind(config: RelayConfig) -> Result<(Self, mpsc::UnboundedReceiver<RelayEvent>)> {
        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", bind_addr))?;

        let (frames, _) = broadcast::channel(config.client_backlog.max(1));
        let (events, events_rx) = mpsc::unbounded_channel();
        let _ = events.send(RelayEvent::Listening {
            addr: listener.local_addr()?,
        });

        let relay = Self {
            listener,
            config,
            frames,
            events,
            next_client_id: 1,
        };
        Ok((relay, events_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Sender for frames originating outside any client, such as the
    /// simulator.
    pub fn publisher(&self) -> broadcast::Sender<String> {
        self.frames.clone()
    }

    /// Accepts viewers until `shutdown` flips, then waits for every client
    /// task to close its socket.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut clients = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(&mut clients, stream, addr, shutdown.clone()),
                    Err(e) => self.emit(RelayEvent::Error {
                        message: format!("accept failed: {}", e),
                    }),
                },
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        }

        while clients.join_next().await.is_some() {}
    }

    fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    fn admit(
        &mut self,
        clients: &mut JoinSet<()>,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) {
        if clients.len() >= self.config.max_clients {
            self.emit(RelayEvent::ConnectionDenied {
                addr,
                reason: "relay full".to_string(),
            });
            return;
        }

        let client = Client {
            id: self.next_client_id,
            addr,
            frames: self.frames.clone(),
            feed: self.frames.subscribe(),
            events: self.events.clone(),
        };
        self.next_client_id += 1;

        clients.spawn(serve_client(client, stream, shutdown));
    }
}

async fn serve_client(mut client: Client, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            let _ = client.events.send(RelayEvent::Error {
                message: format!("handshake with {} failed: {}", client.addr, e),
            });
            return;
        }
    };
    let _ = client.events.send(RelayEvent::ClientConnected {
        client_id: client.id,
        addr: client.addr,
    });

    let (mut sink, mut inbound) = ws.split();

    let reason = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break DisconnectReason::Shutdown;
            }
            frame = client.feed.recv() => match frame {
                Ok(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        log::debug!("Send to client {} failed: {}", client.id, e);
                        break DisconnectReason::Dropped;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let _ = client.events.send(RelayEvent::ClientLagged {
                        client_id: client.id,
                        skipped,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => break DisconnectReason::Shutdown,
            },
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => relay_client_frame(&client, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::Graceful,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Client {} read failed: {}", client.id, e);
                    break DisconnectReason::Dropped;
                }
            },
        }
    };

    let _ = client.events.send(RelayEvent::ClientDisconnected {
        client_id: client.id,
        reason,
    });
}

/// Frames typed into a viewer's debug console are shared with every viewer,
/// the sender included. Anything that is not a channel map is dropped.
fn relay_client_frame(client: &Client, text: &str) {
    match decode_frame(text) {
        Ok(frame) if frame.rejected.is_empty() => {
            log::debug!("Client {} sent {} channel(s)", client.id, frame.envelopes.len());
            let _ = client.frames.send(text.to_owned());
        }
        Ok(frame) => log::warn!(
            "Client {} sent malformed entries: {}",
            client.id,
            frame
                .rejected
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Err(e) => log::warn!("Client {} sent malformed frame: {}", client.id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    use telemux::{ConnectionManager, Endpoint, LinkConfig, ReconnectPolicy, Scheme, WsConnector};

    const WAIT: Duration = Duration::from_secs(5);

    fn local_config() -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    struct Running {
        addr: SocketAddr,
        publisher: broadcast::Sender<String>,
        events: mpsc::UnboundedReceiver<RelayEvent>,
        shutdown: watch::Sender<bool>,
    }

    async fn start(config: RelayConfig) -> Running {
        let (relay, events) = Relay::bind(config).await.unwrap();
        let addr = relay.local_addr().unwrap();
        let publisher = relay.publisher();
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(relay.run(shutdown_rx));
        Running {
            addr,
            publisher,
            events,
            shutdown,
        }
    }

    impl Running {
        async fn next_event(&mut self) -> RelayEvent {
            timeout(WAIT, self.events.recv()).await.unwrap().unwrap()
        }

        async fn wait_connected(&mut self, count: usize) {
            let mut seen = 0;
            while seen < count {
                if let RelayEvent::ClientConnected { .. } = self.next_event().await {
                    seen += 1;
                }
            }
        }
    }

    async fn next_text<S>(ws: &mut S) -> Value
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_published_frames_reach_every_client() {
        let mut relay = start(local_config()).await;
        let url = format!("ws://{}", relay.addr);

        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let (mut second, _) = connect_async(url.as_str()).await.unwrap();
        relay.wait_connected(2).await;

        let frame = json!({"Mode_In": {"tm": 1.0, "data": [1, 0, 0, 0, 0, 0]}});
        relay.publisher.send(frame.to_string()).unwrap();

        assert_eq!(next_text(&mut first).await, frame);
        assert_eq!(next_text(&mut second).await, frame);

        relay.shutdown.send_replace(true);
    }

    #[tokio::test]
    async fn test_client_frames_shared_and_malformed_dropped() {
        let mut relay = start(local_config()).await;
        let url = format!("ws://{}", relay.addr);

        let (mut sender, _) = connect_async(url.as_str()).await.unwrap();
        let (mut watcher, _) = connect_async(url.as_str()).await.unwrap();
        relay.wait_connected(2).await;

        sender.send(Message::Text("not json".into())).await.unwrap();
        sender
            .send(Message::Text(r#"{"Mode_In": {"tm": 1.0}}"#.into()))
            .await
            .unwrap();
        let frame = json!({"Velocity2D_In": {"data": {"vx": 0.1, "vy": 0, "va": 0}}});
        sender
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();

        assert_eq!(next_text(&mut watcher).await, frame);
        assert_eq!(next_text(&mut sender).await, frame);

        relay.shutdown.send_replace(true);
    }

    #[tokio::test]
    async fn test_full_relay_denies_connection() {
        let mut relay = start(RelayConfig {
            max_clients: 1,
            ..local_config()
        })
        .await;
        let url = format!("ws://{}", relay.addr);

        let (_first, _) = connect_async(url.as_str()).await.unwrap();
        relay.wait_connected(1).await;

        assert!(connect_async(url.as_str()).await.is_err());
        loop {
            if let RelayEvent::ConnectionDenied { reason, .. } = relay.next_event().await {
                assert_eq!(reason, "relay full");
                break;
            }
        }

        relay.shutdown.send_replace(true);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let mut relay = start(local_config()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", relay.addr)).await.unwrap();
        relay.wait_connected(1).await;

        relay.shutdown.send_replace(true);

        loop {
            if let RelayEvent::ClientDisconnected { reason, .. } = relay.next_event().await {
                assert_eq!(reason, DisconnectReason::Shutdown);
                break;
            }
        }
        let closed = timeout(WAIT, ws.next()).await.unwrap();
        assert!(matches!(closed, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    }

    #[tokio::test]
    async fn test_link_receives_relayed_telemetry() {
        let mut relay = start(local_config()).await;

        let config = LinkConfig {
            endpoint: Endpoint::new(Scheme::Ws, "127.0.0.1", relay.addr.port()),
            reconnect: ReconnectPolicy::Fixed(Duration::from_millis(50)),
            ..Default::default()
        };
        let mut link: ConnectionManager<WsConnector> =
            ConnectionManager::new(config, WsConnector).unwrap();
        let (delivered_tx, mut delivered) = mpsc::unbounded_channel();
        link.register_channel("MotorLoad_In", (), move |_, payload, _| {
            let _ = delivered_tx.send(payload.clone());
            Ok(())
        });
        link.start();
        relay.wait_connected(1).await;

        let frame = json!({"MotorLoad_In": {"tm": 3.0, "data": [0.1, 0.2, 0.3, 0.4, 0.5, 0.6]}});
        relay.publisher.send(frame.to_string()).unwrap();

        let payload = timeout(WAIT, delivered.recv()).await.unwrap().unwrap();
        assert_eq!(payload, json!([0.1, 0.2, 0.3, 0.4, 0.5, 0.6]));

        link.shutdown();
        link.join().await;
        relay.shutdown.send_replace(true);
    }
}
