mod dispatcher;
mod equality;

pub use dispatcher::{ChannelDispatcher, DispatchOutcome, Handler};
pub use equality::payload_eq;
