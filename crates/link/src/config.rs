use crate::error::ConfigError;
use crate::net::{Endpoint, ReconnectPolicy};
use crate::outbound::{DEFAULT_MAX_PENDING, OutboundPolicy};

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub endpoint: Endpoint,
    pub reconnect: ReconnectPolicy,
    /// Forget LastSeen payloads after every successful reconnect so the first
    /// post-reconnect sample of each channel is always delivered.
    pub reset_dedup_on_reconnect: bool,
    pub outbound: OutboundPolicy,
    pub max_pending_outbound: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            reconnect: ReconnectPolicy::default(),
            reset_dedup_on_reconnect: true,
            outbound: OutboundPolicy::default(),
            max_pending_outbound: DEFAULT_MAX_PENDING,
        }
    }
}

impl LinkConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reconnect.validate()
    }
}
