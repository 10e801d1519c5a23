mod bus;
mod types;

pub use bus::{EventBus, ListenerId};
pub use types::LinkEvent;
