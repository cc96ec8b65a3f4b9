use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Invoked after every mutation of a wired stream.
pub(crate) type Hook<V> = Box<dyn Fn(Option<&V>) + Send + Sync>;

type Callback<V> = Arc<dyn Fn(Option<&V>) + Send + Sync>;

enum Subscriber<V> {
    Callback { id: u64, callback: Callback<V> },
    Channel(flume::Sender<Option<V>>),
}

impl<V> Clone for Subscriber<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Callback { id, callback } => Self::Callback {
                id: *id,
                callback: Arc::clone(callback),
            },
            Self::Channel(sender) => Self::Channel(sender.clone()),
        }
    }
}

struct Subscribers<V> {
    next_id: u64,
    entries: Vec<Subscriber<V>>,
}

/// A live cell holding the current value for one key.
///
/// Every [`store`](Self::store) is visible to every holder of the stream,
/// notifies every subscriber in subscription order and is then forwarded to
/// the stream's hook (the backend write, for streams minted by a registry).
///
/// Stores are serialized: concurrent stores are applied, notified and written
/// through one after the other, so the hook always sees the latest value last.
///
/// Streams compare and hash by identity, never by value.
pub struct StorageStream<V> {
    id: StreamId,
    // Held for the whole of `store`. Re-entrant so that a subscriber may store.
    writer: ReentrantMutex<()>,
    generation: AtomicU64,
    value: RwLock<Option<V>>,
    subscribers: Arc<Mutex<Subscribers<V>>>,
    hook: Option<Hook<V>>,
}

impl<V> StorageStream<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a stream that is not wired to any backend.
    #[must_use]
    pub fn new(value: Option<V>) -> Self {
        Self::build(value, None)
    }

    pub(crate) fn with_hook(value: Option<V>, hook: Hook<V>) -> Self {
        Self::build(value, Some(hook))
    }

    fn build(value: Option<V>, hook: Option<Hook<V>>) -> Self {
        Self {
            id: StreamId::next(),
            writer: ReentrantMutex::new(()),
            generation: AtomicU64::new(0),
            value: RwLock::new(value),
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            })),
            hook,
        }
    }

    /// Identity of this stream.
    #[must_use]
    pub const fn id(&self) -> StreamId {
        self.id
    }

    /// The current value.
    #[must_use]
    pub fn read(&self) -> Option<V> {
        self.value.read().clone()
    }

    /// Replaces the current value, notifies subscribers, then runs the hook.
    ///
    /// Storing a value equal to the current one still notifies. A store made by
    /// a subscriber supersedes the one that notified it: the hook only runs
    /// for the innermost, latest value.
    pub fn store(&self, value: Option<V>) {
        let _writer = self.writer.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.value.write() = value.clone();

        // Notify from a snapshot so subscribers may subscribe, unsubscribe or
        // store without deadlocking on the list.
        let snapshot = self.subscribers.lock().entries.clone();
        let mut disconnected = false;
        for subscriber in &snapshot {
            match subscriber {
                Subscriber::Callback { callback, .. } => callback(value.as_ref()),
                Subscriber::Channel(sender) => {
                    disconnected |= sender.send(value.clone()).is_err();
                }
            }
        }

        if disconnected {
            self.subscribers.lock().entries.retain(|subscriber| {
                !matches!(subscriber, Subscriber::Channel(sender) if sender.is_disconnected())
            });
        }

        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if let Some(hook) = &self.hook {
            hook(value.as_ref());
        }
    }

    /// Calls `callback` with the new value on every subsequent store, until the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&V>) + Send + Sync + 'static,
    {
        let id = {
            let mut subscribers = self.subscribers.lock();
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.entries.push(Subscriber::Callback {
                id,
                callback: Arc::new(callback),
            });
            id
        };

        let subscribers = Arc::downgrade(&self.subscribers);
        Subscription::new(move || unsubscribe(&subscribers, id))
    }

    /// Delivers every subsequent store on a channel. The subscription ends
    /// when the receiver is dropped.
    #[must_use]
    pub fn changes(&self) -> flume::Receiver<Option<V>> {
        let (sender, receiver) = flume::unbounded();
        self.subscribers
            .lock()
            .entries
            .push(Subscriber::Channel(sender));
        receiver
    }

    /// Number of registered subscribers, including channels whose receiver
    /// has been dropped but that have not been pruned by a store yet.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }
}

fn unsubscribe<V>(subscribers: &Weak<Mutex<Subscribers<V>>>, id: u64) {
    if let Some(subscribers) = subscribers.upgrade() {
        subscribers.lock().entries.retain(
            |subscriber| !matches!(subscriber, Subscriber::Callback { id: other, .. } if *other == id),
        );
    }
}

impl<V> PartialEq for StorageStream<V> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<V> Eq for StorageStream<V> {}

impl<V> Hash for StorageStream<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<V> Debug for StorageStream<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageStream")
            .field("id", &self.id)
            .field("wired", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Keeps a [`StorageStream::subscribe`] callback registered. Dropping it
/// unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Keeps the callback registered for the lifetime of the stream.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Type-erased view of a registered stream.
pub(crate) trait ErasedStream: Send + Sync {
    /// Stores "no value", running the stream's hook.
    fn reset(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<V> ErasedStream for StorageStream<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn reset(&self) {
        self.store(None);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    fn recording_hook<V: Clone + Send + 'static>() -> (Arc<Mutex<Vec<Option<V>>>>, Hook<V>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let hook: Hook<V> = {
            let written = Arc::clone(&written);
            Box::new(move |value: Option<&V>| written.lock().push(value.cloned()))
        };
        (written, hook)
    }

    #[test]
    fn test_store_and_read() {
        let stream = StorageStream::new(None);
        assert_eq!(stream.read(), None);

        stream.store(Some(10));
        assert_eq!(stream.read(), Some(10));

        stream.store(None);
        assert_eq!(stream.read(), None);
    }

    #[test]
    fn test_subscribers_notified_in_order_without_dedup() {
        let stream = StorageStream::new(Some(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _first = stream.subscribe({
            let seen = Arc::clone(&seen);
            move |value: Option<&i32>| seen.lock().push(("first", value.copied()))
        });
        let _second = stream.subscribe({
            let seen = Arc::clone(&seen);
            move |value: Option<&i32>| seen.lock().push(("second", value.copied()))
        });

        stream.store(Some(5));
        stream.store(Some(5));
        stream.store(None);

        assert_eq!(
            *seen.lock(),
            vec![
                ("first", Some(5)),
                ("second", Some(5)),
                ("first", Some(5)),
                ("second", Some(5)),
                ("first", None),
                ("second", None),
            ]
        );
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let stream = StorageStream::new(None);
        let count = Arc::new(AtomicU64::new(0));

        let subscription = stream.subscribe({
            let count = Arc::clone(&count);
            move |_: Option<&u8>| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        stream.store(Some(1));
        drop(subscription);
        stream.store(Some(2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_detached_subscription_stays_registered() {
        let stream = StorageStream::new(None);
        let count = Arc::new(AtomicU64::new(0));

        stream
            .subscribe({
                let count = Arc::clone(&count);
                move |_: Option<&u8>| {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();
        stream.store(Some(1));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(stream.subscriber_count(), 1);
    }

    #[test]
    fn test_changes_channel_receives_every_store() {
        let stream = StorageStream::new(None);
        let changes = stream.changes();

        stream.store(Some("a".to_string()));
        stream.store(None);

        assert_eq!(changes.try_recv().unwrap(), Some("a".to_string()));
        assert_eq!(changes.try_recv().unwrap(), None);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_dropped_channel_is_pruned() {
        let stream = StorageStream::new(None);
        drop(stream.changes());
        assert_eq!(stream.subscriber_count(), 1);

        stream.store(Some(1_u8));

        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_hook_runs_after_subscribers() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let stream = StorageStream::<u8>::with_hook(None, {
            let order = Arc::clone(&order);
            Box::new(move |value: Option<&u8>| order.lock().push(format!("hook {value:?}")))
        });
        let _subscription = stream.subscribe({
            let order = Arc::clone(&order);
            move |value: Option<&u8>| order.lock().push(format!("subscriber {value:?}"))
        });

        stream.store(Some(3));

        assert_eq!(
            *order.lock(),
            vec!["subscriber Some(3)".to_string(), "hook Some(3)".to_string()]
        );
    }

    #[test]
    fn test_subscriber_may_store_reentrantly() {
        let stream = Arc::new(StorageStream::new(None));
        let _subscription = stream.subscribe({
            let stream = Arc::downgrade(&stream);
            move |value: Option<&u32>| {
                if let (Some(stream), Some(&value)) = (stream.upgrade(), value) {
                    if value < 3 {
                        stream.store(Some(value + 1));
                    }
                }
            }
        });

        stream.store(Some(0));

        assert_eq!(stream.read(), Some(3));
    }

    #[test]
    fn test_concurrent_stores_are_serialized() {
        let (written, hook) = recording_hook::<u8>();
        let stream = Arc::new(StorageStream::with_hook(None, hook));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (entered, notifying) = flume::bounded(1);
        let _subscription = stream.subscribe({
            let seen = Arc::clone(&seen);
            move |value: Option<&u8>| {
                if value == Some(&1) {
                    let _ = entered.send(());
                    thread::sleep(Duration::from_millis(200));
                }
                seen.lock().push(value.copied());
            }
        });

        let first = thread::spawn({
            let stream = Arc::clone(&stream);
            move || stream.store(Some(1))
        });
        // The first store is now mid-notification.
        notifying.recv().unwrap();
        stream.store(Some(2));
        first.join().unwrap();

        assert_eq!(stream.read(), Some(2));
        assert_eq!(*seen.lock(), vec![Some(1), Some(2)]);
        assert_eq!(*written.lock(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_reentrant_store_is_the_last_written() {
        let (written, hook) = recording_hook::<u32>();
        let stream = Arc::new(StorageStream::with_hook(None, hook));
        let _subscription = stream.subscribe({
            let stream = Arc::downgrade(&stream);
            move |value: Option<&u32>| {
                if let (Some(stream), Some(&value)) = (stream.upgrade(), value) {
                    if value < 3 {
                        stream.store(Some(value + 1));
                    }
                }
            }
        });

        stream.store(Some(0));

        assert_eq!(stream.read(), Some(3));
        assert_eq!(*written.lock(), vec![Some(3)]);
    }

    #[test]
    fn test_identity_not_value_equality() {
        let a = StorageStream::new(Some(1));
        let b = StorageStream::new(Some(1));

        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a, a);

        let set: HashSet<_> = [&a, &b, &a].into_iter().map(StorageStream::id).collect();
        assert_eq!(set.len(), 2);
    }
}
