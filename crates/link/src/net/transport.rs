use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::endpoint::Endpoint;
use crate::error::{LinkError, ProtocolError};

/// Opens sockets to an [`Endpoint`]. The link driver owns exactly one socket
/// at a time and asks for a fresh one on every attempt.
pub trait Connector: Send + Sync + 'static {
    type Socket: Socket;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Socket, LinkError>> + Send;
}

/// A message-oriented, text-framed socket.
pub trait Socket: Send + 'static {
    /// Next inbound frame. `None` means the peer closed the connection.
    /// `Some(Err(ProtocolError))` frames are malformed but the socket is
    /// still usable.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, RecvError>>> + Send;

    fn send(&mut self, text: String) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
    #[error(transparent)]
    Fatal(#[from] LinkError),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Socket = WsSocket;

    async fn connect(&self, endpoint: &Endpoint) -> Result<WsSocket, LinkError> {
        let url = endpoint.url();
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| LinkError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        log::debug!("WebSocket handshake with {} ({})", url, response.status());
        Ok(WsSocket { stream })
    }
}

pub struct WsSocket {
    stream: WsStream,
}

impl Socket for WsSocket {
    async fn recv(&mut self) -> Option<Result<String, RecvError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|_| RecvError::Malformed(ProtocolError::NotUtf8)),
                    );
                }
                Ok(Message::Close(frame)) => {
                    log::debug!("Peer closed connection: {:?}", frame);
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(LinkError::Transport(e.to_string()).into())),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), LinkError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
