//! Consumer registry for synchronous event delivery
//!
//! Producers publish on the caller's thread; every registered consumer is
//! invoked before `publish` returns. Registering returns a [`Subscription`]
//! whose `cancel` stops further delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Consumer<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    active: Arc<AtomicBool>,
    consumer: Consumer<E>,
}

/// Fan-out of events of type `E` to registered consumers.
pub struct EventBus<E> {
    entries: Arc<Mutex<Vec<Entry<E>>>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers `consumer`; it receives every event published until the
    /// returned subscription is cancelled.
    pub fn subscribe<F>(&self, consumer: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|entry| entry.active.load(Ordering::Acquire));
            entries.push(Entry {
                active: Arc::clone(&active),
                consumer: Arc::new(consumer),
            });
        }
        Subscription { active }
    }

    /// Delivers `event` to every active consumer in registration order.
    pub fn publish(&self, event: &E) {
        // Snapshot so consumers may subscribe or cancel while being called.
        let consumers: Vec<(Arc<AtomicBool>, Consumer<E>)> = match self.entries.lock() {
            Ok(mut entries) => {
                entries.retain(|entry| entry.active.load(Ordering::Acquire));
                entries
                    .iter()
                    .map(|entry| (Arc::clone(&entry.active), Arc::clone(&entry.consumer)))
                    .collect()
            }
            Err(_) => return,
        };

        for (active, consumer) in consumers {
            if active.load(Ordering::Acquire) {
                consumer(event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.active.load(Ordering::Acquire))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Cancellation handle for a registered consumer. Dropping it does not cancel.
#[derive(Debug, Clone)]
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Stops delivery to the consumer. Idempotent.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
