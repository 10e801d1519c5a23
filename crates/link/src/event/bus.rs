use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::types::LinkEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Box<dyn FnMut(LinkEvent) + Send>;

enum Sink {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<LinkEvent>),
}

struct Listener {
    id: ListenerId,
    filter: Option<LinkEvent>,
    sink: Sink,
}

#[derive(Default)]
struct Listeners {
    entries: Vec<Listener>,
    next_id: u64,
}

/// Lifecycle event fan-out. Cloning shares the same listener set.
///
/// Callbacks run synchronously on the link driver, in subscription order.
/// They must not subscribe or unsubscribe from inside the callback.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event.
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: FnMut(LinkEvent) + Send + 'static,
    {
        self.add(None, Sink::Callback(Box::new(callback)))
    }

    /// Only `event`.
    pub fn on<F>(&self, event: LinkEvent, mut callback: F) -> ListenerId
    where
        F: FnMut() + Send + 'static,
    {
        self.add(Some(event), Sink::Callback(Box::new(move |_| callback())))
    }

    pub fn channel(&self) -> (ListenerId, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.add(None, Sink::Channel(tx)), rx)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|l| l.id != id);
        listeners.entries.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn emit(&self, event: LinkEvent) {
        log::trace!("Lifecycle event {}", event.as_str());

        let mut listeners = self.lock();
        listeners.entries.retain_mut(|listener| {
            if listener.filter.is_some_and(|f| f != event) {
                return true;
            }
            match &mut listener.sink {
                Sink::Callback(callback) => {
                    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                        log::warn!("Listener for {} panicked", event.as_str());
                    }
                    true
                }
                Sink::Channel(tx) => tx.send(event).is_ok(),
            }
        });
    }

    fn add(&self, filter: Option<LinkEvent>, sink: Sink) -> ListenerId {
        let mut listeners = self.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push(Listener { id, filter, sink });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
