pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod interpolation;
pub mod net;
pub mod outbound;

pub use config::LinkConfig;
pub use dispatch::{ChannelDispatcher, DispatchOutcome, payload_eq};
pub use error::{ConfigError, HandlerError, HandlerResult, LinkError, ProtocolError};
pub use event::{EventBus, LinkEvent, ListenerId};
pub use interpolation::{
    InterpolatedValue, InterpolationConfig, SharedInterpolator, ValueInterpolator,
};
pub use net::{
    ConnectionManager, ConnectionState, Connector, Endpoint, Envelope, LinkHandle, LinkStats,
    ReconnectPolicy, RecvError, Sample, Scheme, Socket, WsConnector,
};
pub use outbound::{OutboundFrame, OutboundPolicy, OutboundQueue, Submission};
