use crate::net::ConnectionState;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a channel map")]
    NotAMap,
    #[error("channel {channel:?} has no data field")]
    MissingData { channel: String },
    #[error("binary frame is not valid utf-8")]
    NotUtf8,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid endpoint {0:?}")]
    Endpoint(String),
    #[error("smoothing factor must be in [0, 1), got {0}")]
    Alpha(f64),
    #[error("epsilon must be positive, got {0}")]
    Epsilon(f64),
    #[error("tick period must be non-zero")]
    TickPeriod,
    #[error("reconnect delay must be non-zero")]
    ReconnectDelay,
    #[error("backoff factor must be at least 1.0, got {0}")]
    BackoffFactor(f64),
}
