//! Process-wide "data changed" fan-out.
//!
//! Publishers never run handlers on their own stack: `publish` captures the
//! handlers registered for the entity kind at that moment and queues them for a
//! single dispatcher thread. One queue means deliveries for a kind arrive in
//! publish order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, trace, warn};

use crate::error::BusError;
use crate::models::EntityKind;

type Handler = Arc<dyn Fn(EntityKind) + Send + Sync>;

struct Delivery {
    kind: EntityKind,
    handlers: Vec<Handler>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EntityKind, Vec<(u64, Handler)>>,
}

struct BusInner {
    registry: Mutex<Registry>,
    queue: Sender<Delivery>,
}

/// Cloneable handle to the bus. The dispatcher thread stops once the last
/// handle is dropped.
#[derive(Clone)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

/// Token returned by [`ChangeBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    kind: EntityKind,
    id: u64,
}

impl ChangeBus {
    /// Start the dispatcher thread. Clones share it; it exits once the last
    /// clone is dropped.
    pub fn new() -> Result<Self, BusError> {
        let (queue, deliveries) = unbounded::<Delivery>();

        thread::Builder::new()
            .name("change-bus".to_string())
            .spawn(move || {
                for delivery in deliveries {
                    trace!(kind = ?delivery.kind, handlers = delivery.handlers.len(), "dispatching change");
                    for handler in &delivery.handlers {
                        handler(delivery.kind);
                    }
                }
                debug!("change bus dispatcher stopped");
            })
            .map_err(BusError::Spawn)?;

        Ok(Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::default()),
                queue,
            }),
        })
    }

    /// Run `handler` on the dispatcher thread for every later publish of
    /// `kind`. Keep the returned token to unsubscribe.
    pub fn subscribe<F>(&self, kind: EntityKind, handler: F) -> Subscription
    where
        F: Fn(EntityKind) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(?kind, id, "subscribed to changes");
        Subscription { kind, id }
    }

    /// Remove a handler. Deliveries already queued for it still run.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut registry = self.registry();
        if let Some(handlers) = registry.handlers.get_mut(&subscription.kind) {
            handlers.retain(|(id, _)| *id != subscription.id);
        }
        debug!(kind = ?subscription.kind, id = subscription.id, "unsubscribed from changes");
    }

    /// Queue one delivery to every handler subscribed to `kind` right now.
    /// Returns without waiting for them.
    pub fn publish(&self, kind: EntityKind) {
        let registry = self.registry();
        let handlers: Vec<Handler> = registry
            .handlers
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            trace!(?kind, "change published with no subscribers");
            return;
        }
        // Sent while the registry lock is held so concurrent publishers queue in
        // the order they observed the registry.
        if self.inner.queue.send(Delivery { kind, handlers }).is_err() {
            warn!(?kind, "change bus dispatcher is gone; dropping notification");
        }
    }

    pub fn subscriber_count(&self, kind: EntityKind) -> usize {
        self.registry().handlers.get(&kind).map_or(0, Vec::len)
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn recording(bus: &ChangeBus, tag: u32) -> (Subscription, Receiver<u32>) {
        let (tx, rx) = unbounded();
        let sub = bus.subscribe(EntityKind::Students, move |_| {
            let _ = tx.send(tag);
        });
        (sub, rx)
    }

    #[test]
    fn delivers_to_every_subscriber() {
        let bus = ChangeBus::new().unwrap();
        let (_a, rx_a) = recording(&bus, 1);
        let (_b, rx_b) = recording(&bus, 2);

        bus.publish(EntityKind::Students);

        assert_eq!(rx_a.recv_timeout(WAIT).unwrap(), 1);
        assert_eq!(rx_b.recv_timeout(WAIT).unwrap(), 2);
    }

    #[test]
    fn publish_does_not_run_handlers_inline() {
        let bus = ChangeBus::new().unwrap();
        let (release_tx, release_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = unbounded();
        bus.subscribe(EntityKind::Students, move |_| {
            release_rx.recv().unwrap();
            done_tx.send(()).unwrap();
        });

        // Would deadlock if the handler ran on this thread.
        bus.publish(EntityKind::Students);
        release_tx.send(()).unwrap();
        done_rx.recv_timeout(WAIT).unwrap();
    }

    #[test]
    fn unsubscribed_handler_misses_later_publishes() {
        let bus = ChangeBus::new().unwrap();
        let (sub, rx) = recording(&bus, 7);
        let (_keep, rx_keep) = recording(&bus, 8);

        bus.unsubscribe(&sub);
        bus.publish(EntityKind::Students);

        assert_eq!(rx_keep.recv_timeout(WAIT).unwrap(), 8);
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(EntityKind::Students), 1);
    }

    #[test]
    fn deliveries_keep_publish_order() {
        let bus = ChangeBus::new().unwrap();
        let (tx, rx) = unbounded();
        let counter = Arc::new(Mutex::new(0u32));
        let seen = counter.clone();
        bus.subscribe(EntityKind::Students, move |_| {
            let mut n = seen.lock().unwrap();
            *n += 1;
            tx.send(*n).unwrap();
        });

        for _ in 0..20 {
            bus.publish(EntityKind::Students);
        }

        let received: Vec<u32> = (0..20).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(received, (1..=20).collect::<Vec<_>>());
    }
}
