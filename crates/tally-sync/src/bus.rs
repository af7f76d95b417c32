//! In-process publish/subscribe bus
//!
//! Carries sync lifecycle messages between the engine and its consumers.
//! Subscribers are held weakly, so the bus never keeps a component alive;
//! dropping the [`Subscription`] handle (or the subscriber itself) ends
//! delivery, and dead entries are additionally purged lazily on send.
//!
//! Delivery is thread-aware: a subscriber registered as thread-safe is
//! invoked directly on the sending thread, anything else is queued and
//! delivered when the owning thread drains the queue via [`MessageBus::pump`].
//! Sends from the owning thread drain synchronously. The registry lock is
//! never held while a listener runs, so listeners may freely send or
//! subscribe from inside a callback.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};

use tracing::trace;

/// Marker for types that can travel over the bus
pub trait Message: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Message for T {}

/// A subscriber callback for one message type
pub trait Listener<M: Message>: Send + Sync {
    fn on_message(&self, message: &M);
}

type InvokeFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;
type AliveFn = Arc<dyn Fn() -> bool + Send + Sync>;
type QueuedJob = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
struct Entry {
    id: u64,
    thread_safe: bool,
    alive: AliveFn,
    invoke: InvokeFn,
}

/// Handle representing one subscription. Dropping it unsubscribes.
#[must_use = "dropping the subscription immediately unsubscribes"]
pub struct Subscription {
    id: u64,
    bus: Weak<MessageBus>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_ids(&[self.id]);
        }
    }
}

/// Thread-aware weak-reference message bus
pub struct MessageBus {
    registry: Mutex<HashMap<TypeId, Vec<Entry>>>,
    queue: Mutex<VecDeque<QueuedJob>>,
    draining: AtomicBool,
    owner_thread: ThreadId,
    next_id: AtomicU64,
}

impl MessageBus {
    /// Create a bus owned by the current thread. Non-thread-safe
    /// subscribers are only ever invoked on this thread.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            owner_thread: thread::current().id(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register `listener` for messages of type `M`. The listener is held
    /// weakly; keep the returned handle (and the listener) alive for as
    /// long as delivery is wanted.
    pub fn subscribe<M, L>(self: &Arc<Self>, listener: &Arc<L>, thread_safe: bool) -> Subscription
    where
        M: Message,
        L: Listener<M> + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(listener);
        let alive_weak = weak.clone();
        let entry = Entry {
            id,
            thread_safe,
            alive: Arc::new(move || alive_weak.strong_count() > 0),
            invoke: Arc::new(move |message| {
                let Some(listener) = weak.upgrade() else { return };
                if let Some(message) = message.downcast_ref::<M>() {
                    listener.on_message(message);
                }
            }),
        };
        self.lock_registry()
            .entry(TypeId::of::<M>())
            .or_default()
            .push(entry);
        Subscription { id, bus: Arc::downgrade(self) }
    }

    /// Remove a subscription explicitly. Entries with this handle's id are
    /// removed from every registered message type; callers need not
    /// remember which type they subscribed with.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.remove_ids(&[subscription.id]);
    }

    /// Deliver `message` to all live subscribers of its type.
    ///
    /// Runs a subscriber on the sending thread only when it is marked
    /// thread-safe and the sender is not the owning thread; everything
    /// else goes through the owner-thread queue. Sends from the owning
    /// thread drain the queue before returning.
    pub fn send<M: Message>(&self, message: M) {
        let entries: Vec<Entry> = self
            .lock_registry()
            .get(&TypeId::of::<M>())
            .cloned()
            .unwrap_or_default();
        if entries.is_empty() {
            return;
        }

        let on_owner = thread::current().id() == self.owner_thread;
        let mut dead = Vec::new();
        let mut queued = false;
        for entry in entries {
            if !(entry.alive)() {
                dead.push(entry.id);
                continue;
            }
            if entry.thread_safe && !on_owner {
                (entry.invoke)(&message);
            } else {
                let invoke = Arc::clone(&entry.invoke);
                let message = message.clone();
                self.lock_queue()
                    .push_back(Box::new(move || invoke(&message)));
                queued = true;
            }
        }
        if !dead.is_empty() {
            trace!(purged = dead.len(), "purged dead bus subscriptions");
            self.remove_ids(&dead);
        }
        if queued && on_owner {
            self.pump();
        }
    }

    /// Drain queued deliveries. Call from the owning thread. Draining
    /// while a drain is already in progress is a no-op, which keeps a
    /// listener that publishes from inside its callback from growing the
    /// stack.
    pub fn pump(&self) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        loop {
            let Some(job) = self.lock_queue().pop_front() else {
                break;
            };
            job();
        }
        self.draining.store(false, Ordering::Release);
    }

    /// Number of registered (not necessarily live) subscriptions for `M`
    #[must_use]
    pub fn subscription_count<M: Message>(&self) -> usize {
        self.lock_registry()
            .get(&TypeId::of::<M>())
            .map_or(0, Vec::len)
    }

    fn remove_ids(&self, ids: &[u64]) {
        let mut registry = self.lock_registry();
        for entries in registry.values_mut() {
            entries.retain(|entry| !ids.contains(&entry.id));
        }
        registry.retain(|_, entries| !entries.is_empty());
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<TypeId, Vec<Entry>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedJob>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Ping(u32);

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Pong(u32);

    #[derive(Default)]
    struct Recorder {
        pings: Mutex<Vec<Ping>>,
    }

    impl Listener<Ping> for Recorder {
        fn on_message(&self, message: &Ping) {
            self.pings.lock().unwrap().push(message.clone());
        }
    }

    #[test]
    fn send_delivers_to_subscriber() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = bus.subscribe::<Ping, _>(&recorder, false);

        bus.send(Ping(1));
        bus.send(Ping(2));
        assert_eq!(*recorder.pings.lock().unwrap(), vec![Ping(1), Ping(2)]);
    }

    #[test]
    fn send_without_subscribers_is_a_noop() {
        let bus = MessageBus::new();
        bus.send(Ping(1));
    }

    #[test]
    fn dropped_listener_is_purged_on_next_send() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = bus.subscribe::<Ping, _>(&recorder, false);
        assert_eq!(bus.subscription_count::<Ping>(), 1);

        drop(recorder);
        bus.send(Ping(1));
        assert_eq!(bus.subscription_count::<Ping>(), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        let sub = bus.subscribe::<Ping, _>(&recorder, false);
        drop(sub);

        bus.send(Ping(1));
        assert!(recorder.pings.lock().unwrap().is_empty());
        assert_eq!(bus.subscription_count::<Ping>(), 0);
    }

    #[test]
    fn explicit_unsubscribe_removes_entry() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        let sub = bus.subscribe::<Ping, _>(&recorder, false);
        bus.unsubscribe(&sub);

        bus.send(Ping(1));
        assert!(recorder.pings.lock().unwrap().is_empty());
    }

    #[test]
    fn thread_safe_subscriber_runs_on_sending_thread() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = bus.subscribe::<Ping, _>(&recorder, true);

        let bus_for_thread = Arc::clone(&bus);
        std::thread::spawn(move || bus_for_thread.send(Ping(7)))
            .join()
            .unwrap();
        // Delivered inline on the sender; no pump needed
        assert_eq!(*recorder.pings.lock().unwrap(), vec![Ping(7)]);
    }

    #[test]
    fn non_thread_safe_subscriber_waits_for_pump() {
        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = bus.subscribe::<Ping, _>(&recorder, false);

        let bus_for_thread = Arc::clone(&bus);
        std::thread::spawn(move || bus_for_thread.send(Ping(7)))
            .join()
            .unwrap();
        assert!(recorder.pings.lock().unwrap().is_empty());

        bus.pump();
        assert_eq!(*recorder.pings.lock().unwrap(), vec![Ping(7)]);
    }

    #[test]
    fn listener_publishing_from_callback_does_not_recurse() {
        struct Chainer {
            bus: Arc<MessageBus>,
        }

        #[derive(Default)]
        struct Recorder2 {
            pongs: Mutex<Vec<Pong>>,
        }

        impl Listener<Pong> for Recorder2 {
            fn on_message(&self, message: &Pong) {
                self.pongs.lock().unwrap().push(message.clone());
            }
        }

        impl Listener<Ping> for Chainer {
            fn on_message(&self, message: &Ping) {
                // Re-entrant send while the queue is draining
                self.bus.send(Pong(message.0));
            }
        }

        let bus = MessageBus::new();
        let recorder = Arc::new(Recorder2::default());
        let chainer = Arc::new(Chainer { bus: Arc::clone(&bus) });
        let _sub_ping = bus.subscribe::<Ping, _>(&chainer, false);
        let _sub_pong = bus.subscribe::<Pong, _>(&recorder, false);

        bus.send(Ping(3));
        assert_eq!(*recorder.pongs.lock().unwrap(), vec![Pong(3)]);
    }
}
