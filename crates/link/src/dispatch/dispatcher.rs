use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;

use super::equality::payload_eq;
use crate::error::HandlerResult;
use crate::net::Envelope;

pub type Handler<P> = Box<dyn FnMut(&str, &Value, &P) -> HandlerResult + Send>;

struct Route<P> {
    params: P,
    handler: Handler<P>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Duplicate,
    Unrouted,
    HandlerFailed,
}

/// Routes envelopes to the handler registered for their channel. `P` is
/// handed back to the handler on every call.
pub struct ChannelDispatcher<P = ()> {
    routes: HashMap<String, Route<P>>,
    last_seen: HashMap<String, Envelope>,
}

impl<P> Default for ChannelDispatcher<P> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            last_seen: HashMap::new(),
        }
    }
}

impl<P> ChannelDispatcher<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, channel: impl Into<String>, params: P, handler: F) -> bool
    where
        F: FnMut(&str, &Value, &P) -> HandlerResult + Send + 'static,
    {
        let route = Route {
            params,
            handler: Box::new(handler),
        };
        self.routes.insert(channel.into(), route).is_some()
    }

    pub fn unregister(&mut self, channel: &str) -> Option<P> {
        self.routes.remove(channel).map(|route| route.params)
    }

    pub fn is_registered(&self, channel: &str) -> bool {
        self.routes.contains_key(channel)
    }

    // LastSeen keeps the previous envelope when this one is a duplicate.
    pub fn dispatch(&mut self, envelope: Envelope, previous: Option<&Envelope>) -> DispatchOutcome {
        let outcome = self.route(&envelope, previous);
        if outcome != DispatchOutcome::Duplicate {
            self.last_seen.insert(envelope.channel.clone(), envelope);
        }
        outcome
    }

    pub fn receive(&mut self, envelope: Envelope) -> DispatchOutcome {
        let previous = self.last_seen.remove(&envelope.channel);
        let outcome = self.route(&envelope, previous.as_ref());

        let keep = match (outcome, previous) {
            (DispatchOutcome::Duplicate, Some(previous)) => previous,
            _ => envelope,
        };
        self.last_seen.insert(keep.channel.clone(), keep);

        outcome
    }

    pub fn last_seen(&self, channel: &str) -> Option<&Envelope> {
        self.last_seen.get(channel)
    }

    pub fn reset_last_seen(&mut self) {
        self.last_seen.clear();
    }

    fn route(&mut self, envelope: &Envelope, previous: Option<&Envelope>) -> DispatchOutcome {
        if previous.is_some_and(|p| payload_eq(&p.payload, &envelope.payload)) {
            return DispatchOutcome::Duplicate;
        }

        let Some(route) = self.routes.get_mut(&envelope.channel) else {
            log::trace!("No handler for channel {}", envelope.channel);
            return DispatchOutcome::Unrouted;
        };

        let channel = envelope.channel.as_str();
        let result = catch_unwind(AssertUnwindSafe(|| {
            (route.handler)(channel, &envelope.payload, &route.params)
        }));

        match result {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => {
                log::warn!("Handler for {} failed: {}", channel, e);
                DispatchOutcome::HandlerFailed
            }
            Err(_) => {
                log::warn!("Handler for {} panicked", channel);
                DispatchOutcome::HandlerFailed
            }
        }
    }
}

impl<P> std::fmt::Debug for ChannelDispatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDispatcher")
            .field("routes", &self.routes.len())
            .field("last_seen", &self.last_seen.len())
            .finish()
    }
}
