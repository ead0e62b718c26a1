//! Publish/subscribe for graph mutation events.
//!
//! Two delivery paths share one `publish` call:
//!
//! - synchronous listeners registered with [`EventBus::on`], invoked in
//!   registration order on the publishing thread
//! - a tokio broadcast channel for async consumers ([`EventBus::subscribe`])
//!
//! A panicking listener is isolated: it is logged and counted, the remaining
//! listeners still run, and the mutation that published the event is not
//! affected.

use crate::models::GraphEvent;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Default broadcast buffer capacity.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;

type Listener = dyn Fn(&GraphEvent) + Send + Sync;
type Listeners = RwLock<Vec<(ListenerId, Arc<Listener>)>>;

fn read_listeners(lock: &Listeners) -> RwLockReadGuard<'_, Vec<(ListenerId, Arc<Listener>)>> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("Event listener lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write_listeners(lock: &Listeners) -> RwLockWriteGuard<'_, Vec<(ListenerId, Arc<Listener>)>> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("Event listener lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Handle returned by [`EventBus::on`], used to unregister a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event bus for graph mutation events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GraphEvent>,
    listeners: Arc<Listeners>,
    next_id: Arc<AtomicU64>,
}

/// Filtered receiver that yields events matching a predicate.
pub struct FilteredReceiver<F> {
    receiver: broadcast::Receiver<GraphEvent>,
    predicate: F,
}

impl EventBus {
    /// Creates a new event bus with the given broadcast capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a synchronous listener.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = write_listeners(&self.listeners);
        listeners.push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = write_listeners(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Returns the number of registered synchronous listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        read_listeners(&self.listeners).len()
    }

    /// Publishes an event to every listener and broadcast subscriber.
    pub fn publish(&self, event: GraphEvent) {
        metrics::counter!("event_bus_publish_total", "event_type" => event.event_type())
            .increment(1);

        // Snapshot so listeners may register or unregister while being called.
        let listeners: Vec<Arc<Listener>> = read_listeners(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!(
                    event_type = event.event_type(),
                    "Graph event listener panicked"
                );
                metrics::counter!("event_bus_listener_panics_total").increment(1);
            }
        }

        // No receivers is not an error.
        if self.sender.receiver_count() > 0 && self.sender.send(event).is_err() {
            metrics::counter!("event_bus_publish_failed_total").increment(1);
        }
    }

    /// Subscribes to the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        metrics::counter!("event_bus_subscriptions_total").increment(1);
        self.sender.subscribe()
    }

    /// Subscribes with a predicate to filter events.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&GraphEvent) -> bool,
    {
        metrics::counter!("event_bus_subscriptions_total").increment(1);
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            predicate,
        }
    }

    /// Subscribes to events of one type, e.g. `entity:created`.
    #[must_use]
    pub fn subscribe_event_type(
        &self,
        event_type: &'static str,
    ) -> FilteredReceiver<impl Fn(&GraphEvent) -> bool> {
        self.subscribe_filtered(move |event| event.event_type() == event_type)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&GraphEvent) -> bool,
{
    /// Receives the next event that matches the predicate.
    pub async fn recv(&mut self) -> Result<GraphEvent, broadcast::error::RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.predicate)(&event) {
                        return Ok(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("event_bus_lagged_total").increment(skipped);
                },
                Err(err) => return Err(err),
            }
        }
    }
}
