use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// A handler receives the event payload as `&dyn Any` and downcasts itself.
///
/// Handlers run synchronously, in registration order, on the thread that calls
/// [`EventBus::publish`]. A handler that panics is caught and logged; it does not
/// stop later handlers for the same event from running.
pub type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    by_name: HashMap<String, Vec<Handler>>,
}

/// Synchronous, name-keyed publish/subscribe bus.
///
/// Events are identified by a plain string name rather than by type, so unrelated
/// components can agree on a channel (e.g. `"config.changed"`) without sharing a
/// type. Each handler registered for a name is called at least once per publish to
/// that name, in the order it was subscribed.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `event_name`. Returns a [`Subscription`] that can be
    /// used to unsubscribe later; dropping it does not unsubscribe.
    pub fn subscribe<F>(&self, event_name: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&dyn Any) + Send + Sync + 'static,
    {
        let event_name = event_name.into();
        let handler: Handler = Arc::new(handler);
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        let bucket = subs.by_name.entry(event_name.clone()).or_default();
        bucket.push(handler.clone());
        Subscription {
            event_name,
            handler: Arc::downgrade(&handler),
        }
    }

    /// Removes a previously registered subscription. No-op if already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let Some(handler) = subscription.handler.upgrade() else {
            return;
        };
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        if let Some(bucket) = subs.by_name.get_mut(&subscription.event_name) {
            bucket.retain(|h| !Arc::ptr_eq(h, &handler));
        }
    }

    /// Publishes `payload` to every handler subscribed to `event_name`, in
    /// registration order. A handler panic is caught and isolated: it is reported
    /// via the returned count but does not prevent remaining handlers from running.
    ///
    /// Returns the number of handlers that panicked.
    pub fn publish(&self, event_name: &str, payload: &dyn Any) -> usize {
        let handlers = {
            let subs = self.subscribers.lock().expect("event bus mutex poisoned");
            subs.by_name.get(event_name).cloned().unwrap_or_default()
        };

        let mut panics = 0;
        for handler in handlers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(payload)));
            if result.is_err() {
                panics += 1;
            }
        }
        panics
    }

    /// Number of handlers currently subscribed to `event_name`.
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        let subs = self.subscribers.lock().expect("event bus mutex poisoned");
        subs.by_name.get(event_name).map(Vec::len).unwrap_or(0)
    }
}

/// Handle returned from [`EventBus::subscribe`], usable with [`EventBus::unsubscribe`].
pub struct Subscription {
    event_name: String,
    handler: std::sync::Weak<dyn Fn(&dyn Any) + Send + Sync>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe("evt", move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe("evt", move |_| o2.lock().unwrap().push(2));
        let o3 = order.clone();
        bus.subscribe("evt", move |_| o3.lock().unwrap().push(3));

        bus.publish("evt", &());
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unrelated_event_names_do_not_cross_fire() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe("a", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish("b", &());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_does_not_block_siblings() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("evt", |_| panic!("boom"));
        let h = hits.clone();
        bus.subscribe("evt", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let panics = bus.publish("evt", &());
        assert_eq!(panics, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn downcasts_typed_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(String::new()));
        let s = seen.clone();
        bus.subscribe("typed", move |payload| {
            if let Some(text) = payload.downcast_ref::<String>() {
                *s.lock().unwrap() = text.clone();
            }
        });
        bus.publish("typed", &"hello".to_string());
        assert_eq!(*seen.lock().unwrap(), "hello");
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = bus.subscribe("evt", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish("evt", &());
        bus.unsubscribe(&sub);
        bus.publish("evt", &());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
