use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use telemux::{
    ConnectionManager, ConnectionState, Endpoint, LinkConfig, OutboundFrame, ReconnectPolicy,
    Scheme, WsConnector,
};

const WAIT: Duration = Duration::from_secs(5);

/// Serves two connections in turn. Each gets one frame, then the server
/// waits for one frame back and drops the socket.
async fn spawn_server() -> (u16, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (received_tx, received_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for round in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let frame = json!({ "Mode_In": { "tm": 1.0 + round as f64, "data": [round] } });
            let message = if round == 0 {
                Message::Text(frame.to_string().into())
            } else {
                Message::Binary(frame.to_string().into_bytes().into())
            };
            ws.send(message).await.unwrap();

            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    let _ = received_tx.send(value);
                    break;
                }
            }
        }
    });

    (port, received_rx)
}

#[tokio::test]
async fn test_websocket_round_trip_and_reconnect() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (port, mut received) = spawn_server().await;
    let config = LinkConfig {
        endpoint: Endpoint::new(Scheme::Ws, "127.0.0.1", port),
        reconnect: ReconnectPolicy::Fixed(Duration::from_millis(50)),
        ..Default::default()
    };
    let mut manager: ConnectionManager<WsConnector> =
        ConnectionManager::new(config, WsConnector).unwrap();

    let (delivered_tx, mut delivered) = mpsc::unbounded_channel();
    manager.register_channel("Mode_In", (), move |_, payload, _| {
        let _ = delivered_tx.send(payload.clone());
        Ok(())
    });
    manager.start();

    for round in 0..2 {
        let payload = timeout(WAIT, delivered.recv())
            .await
            .expect("server frame not delivered")
            .unwrap();
        assert_eq!(payload, json!([round]));

        let frame = OutboundFrame::new().with("Velocity2D_In", json!({"vx": 0.5, "va": round}));
        assert!(manager.send(frame));

        let echoed = timeout(WAIT, received.recv())
            .await
            .expect("client frame not received")
            .unwrap();
        assert_eq!(echoed["Velocity2D_In"]["data"]["va"], json!(round));
        assert!(echoed["Velocity2D_In"]["tm"].is_f64());
    }

    let stats = manager.stats();
    assert!(stats.reconnect_cycles >= 1);
    assert_eq!(stats.frames_sent, 2);

    manager.shutdown();
    timeout(WAIT, manager.join()).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_unreachable_endpoint_keeps_retrying() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = LinkConfig {
        endpoint: Endpoint::new(Scheme::Ws, "127.0.0.1", port),
        reconnect: ReconnectPolicy::Fixed(Duration::from_millis(10)),
        ..Default::default()
    };
    let mut manager: ConnectionManager<WsConnector> =
        ConnectionManager::new(config, WsConnector).unwrap();
    manager.start();

    let handle = manager.handle();
    timeout(WAIT, async {
        while handle.stats().connect_attempts < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("link stopped retrying");
    assert_ne!(handle.state(), ConnectionState::Connected);
    assert_eq!(handle.stats().reconnect_cycles, 1);

    manager.shutdown();
    timeout(WAIT, manager.join()).await.unwrap();
}
