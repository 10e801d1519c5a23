mod backoff;
mod connection;
mod endpoint;
mod manager;
mod protocol;
mod stats;
mod transport;

pub use backoff::{DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_RECONNECT_DELAY_MS, ReconnectPolicy};
pub use connection::{ConnectionState, StateMachine};
pub use endpoint::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SECURE_PORT, Endpoint, Scheme};
pub use manager::{ConnectionManager, LinkHandle};
pub use protocol::{DecodedFrame, Envelope, Sample, decode_frame, encode_frame, now_secs};
pub use stats::LinkStats;
pub use transport::{Connector, RecvError, Socket, WsConnector, WsSocket};
