#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    /// A connection attempt is starting (first attempt included).
    Connect,
    Connected,
    Disconnected,
    /// A reconnection cycle is starting. Fires once per cycle, before the
    /// cycle's first `Connect`.
    Reconnect,
}

impl LinkEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkEvent::Connect => "connect",
            LinkEvent::Connected => "connected",
            LinkEvent::Disconnected => "disconnected",
            LinkEvent::Reconnect => "reconnect",
        }
    }
}
