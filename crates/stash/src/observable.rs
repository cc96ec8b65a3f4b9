use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::StreamId;
use crate::stream::{ErasedStream, Hook};

/// A cell exposing its value as a plain property rather than a subscription.
///
/// Consumers poll [`read`](Self::read) (or [`version`](Self::version) to detect
/// change). Reads and writes are atomic with respect to each other; a read
/// racing a set returns either the old or the new value.
pub struct ObservableStream<V> {
    id: StreamId,
    value: Mutex<Option<V>>,
    version: AtomicU64,
    hook: Option<Hook<V>>,
}

impl<V> ObservableStream<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a stream that is not wired to any backend.
    #[must_use]
    pub fn new(value: Option<V>) -> Self {
        Self::build(StreamId::next(), value, None)
    }

    pub(crate) fn with_hook(id: StreamId, value: Option<V>, hook: Hook<V>) -> Self {
        Self::build(id, value, Some(hook))
    }

    fn build(id: StreamId, value: Option<V>, hook: Option<Hook<V>>) -> Self {
        Self {
            id,
            value: Mutex::new(value),
            version: AtomicU64::new(0),
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
        self.value.lock().clone()
    }

    /// Replaces the current value, then runs the hook.
    pub fn set(&self, value: Option<V>) {
        self.update(|slot| *slot = value);
    }

    /// Mutates the value in place under the stream's lock, then runs the hook
    /// with the result.
    ///
    /// The hook runs before the lock is released, so hooks observe mutations
    /// in the order they were applied.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Option<V>),
    {
        let mut slot = self.value.lock();
        mutate(&mut slot);
        self.version.fetch_add(1, Ordering::AcqRel);

        if let Some(hook) = &self.hook {
            hook(slot.as_ref());
        }
    }

    /// Number of sets and updates applied so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<V> PartialEq for ObservableStream<V> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<V> Eq for ObservableStream<V> {}

impl<V> Hash for ObservableStream<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<V> Debug for ObservableStream<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableStream")
            .field("id", &self.id)
            .field("version", &self.version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<V> ErasedStream for ObservableStream<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn reset(&self) {
        self.set(None);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
