//! Multicast push stream with explicit subscribe/unsubscribe.
//!
//! A [`Stream`] delivers every pushed value to every subscriber that was
//! registered when the push started, in registration order, before
//! `push` returns. Nothing is buffered or replayed: pushing to a stream
//! with no subscribers is a no-op.
//!
//! Handlers run without any stream lock held, so a handler may push,
//! subscribe, or unsubscribe (itself or others). An unsubscribed handler
//! is never invoked again, even if it was part of the snapshot taken by
//! a push that is still in progress.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::watch::Listener;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: u64,
    active: Arc<AtomicBool>,
    handler: Handler<T>,
}

struct Shared<T> {
    next_id: AtomicU64,
    slots: Mutex<Vec<Slot<T>>>,
}

/// Removes a subscriber by id. Lets [`Subscription`] stay non-generic.
trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: Send + Sync + 'static> Detach for Shared<T> {
    fn detach(&self, id: u64) {
        self.slots.lock().retain(|slot| slot.id != id);
    }
}

/// A multicast stream of `T`. Cloning yields another handle to the same
/// stream.
pub struct Stream<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> Stream<T> {
    /// Create a stream with no subscribers.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_id: AtomicU64::new(0),
                slots: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register `handler` for every value pushed from now on.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.shared.slots.lock().push(Slot {
            id,
            active: active.clone(),
            handler: Arc::new(handler),
        });

        let shared: Arc<dyn Detach> = self.shared.clone();
        Subscription {
            id,
            active,
            stream: Arc::downgrade(&shared),
        }
    }

    /// Deliver `value` to all current subscribers.
    pub fn push(&self, value: T) {
        let snapshot: Vec<(Arc<AtomicBool>, Handler<T>)> = self
            .shared
            .slots
            .lock()
            .iter()
            .map(|slot| (slot.active.clone(), slot.handler.clone()))
            .collect();

        for (active, handler) in snapshot {
            if active.load(Ordering::Acquire) {
                handler(&value);
            }
        }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.slots.lock().len()
    }

    /// Receive pushed values asynchronously.
    pub fn listen(&self) -> Listener<T>
    where
        T: Clone,
    {
        Listener::attach(self)
    }
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("subscribers", &self.shared.slots.lock().len())
            .finish()
    }
}

/// Handle to one registered handler.
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep
/// the handler registered for the life of the stream.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    stream: Weak<dyn Detach>,
}

impl Subscription {
    /// Stop delivery to this handler. Idempotent, and safe to call from
    /// inside any handler of the same stream.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(stream) = self.stream.upgrade() {
                stream.detach(self.id);
            }
        }
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Leave the handler registered without keeping a handle.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(&i32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &i32| sink.lock().push(*v))
    }

    #[test]
    fn test_push_without_subscribers() {
        let stream: Stream<i32> = Stream::new();
        stream.push(1);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_values_delivered_in_push_order() {
        let stream = Stream::new();
        let (a, handler_a) = recorder();
        let (b, handler_b) = recorder();
        let _sa = stream.subscribe(handler_a);
        let _sb = stream.subscribe(handler_b);

        for v in 1..=5 {
            stream.push(v);
        }

        assert_eq!(*a.lock(), vec![1, 2, 3, 4, 5]);
        assert_eq!(*b.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_no_replay_for_late_subscriber() {
        let stream = Stream::new();
        stream.push(1);

        let (seen, handler) = recorder();
        let _sub = stream.subscribe(handler);
        stream.push(2);

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_subscribers_called_in_registration_order() {
        let stream = Stream::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = order.clone();
                stream.subscribe(move |_: &()| order.lock().push(i))
            })
            .collect();

        stream.push(());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        drop(subs);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let stream = Stream::new();
        let (seen, handler) = recorder();
        let sub = stream.subscribe(handler);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        stream.push(1);

        assert!(seen.lock().is_empty());
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let stream = Stream::new();
        let (seen, handler) = recorder();
        drop(stream.subscribe(handler));
        stream.push(1);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_detach_keeps_handler() {
        let stream = Stream::new();
        let (seen, handler) = recorder();
        stream.subscribe(handler).detach();
        stream.push(7);
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_handler_unsubscribes_itself() {
        let stream = Stream::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let sub = {
            let slot = slot.clone();
            let calls = calls.clone();
            stream.subscribe(move |_: &i32| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().as_ref() {
                    sub.unsubscribe();
                }
            })
        };
        *slot.lock() = Some(sub);

        stream.push(1);
        stream.push(2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribing_later_handler_during_push() {
        let stream = Stream::new();
        let second: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let _first = {
            let second = second.clone();
            stream.subscribe(move |_: &i32| {
                if let Some(sub) = second.lock().as_ref() {
                    sub.unsubscribe();
                }
            })
        };
        let (seen, handler) = recorder();
        *second.lock() = Some(stream.subscribe(handler));

        stream.push(1);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_handler_may_push_reentrantly() {
        let stream: Stream<i32> = Stream::new();
        let (seen, handler) = recorder();
        let _rec = stream.subscribe(handler);
        let _echo = {
            let stream = stream.clone();
            stream.clone().subscribe(move |v: &i32| {
                if *v == 1 {
                    stream.push(2);
                }
            })
        };

        stream.push(1);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_after_stream_dropped() {
        let stream = Stream::new();
        let (_, handler) = recorder();
        let sub = stream.subscribe(handler);
        drop(stream);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }
}
