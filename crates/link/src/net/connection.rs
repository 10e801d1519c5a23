use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Connecting)
                | (Idle | Connecting | Connected | Disconnected, Closed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == ConnectionState::Closed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Owns the single state value of a link. Every change goes through
/// [`StateMachine::transition`].
#[derive(Debug, Default)]
pub struct StateMachine {
    state: ConnectionState,
    attempts: u32,
    connected_once: bool,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, LinkError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(LinkError::InvalidTransition { from, to: next });
        }

        match next {
            ConnectionState::Connecting => self.attempts += 1,
            ConnectionState::Connected => {
                self.attempts = 0;
                self.connected_once = true;
            }
            _ => {}
        }

        log::debug!("Link state {} -> {}", from.as_str(), next.as_str());
        self.state = next;
        Ok(from)
    }

    /// Attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn has_connected(&self) -> bool {
        self.connected_once
    }
}
