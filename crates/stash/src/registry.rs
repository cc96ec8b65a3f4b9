use std::any::{TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tracing::{debug, info, warn};

use crate::stream::ErasedStream;
use crate::{
    Backend, Error, Key, ObservableStream, StorageStream, StreamId, Value, WriteBehind,
};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

// Dead entries are swept once a map has doubled since the last sweep, but
// never below this size.
const MIN_SWEEP_THRESHOLD: usize = 32;

/// What the registry does when a stream is requested at a type other than the
/// one of the live stream for the same key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeMismatchPolicy {
    /// Mint a new stream of the requested type, seeded from the backend, and
    /// let it replace the registry entry. Holders of the old stream keep it.
    #[default]
    Shadow,

    /// Fail with [`Error::TypeMismatch`].
    Reject,
}

/// Configuration for a [`Registry`].
#[derive(Clone, Debug)]
pub struct RegistryConfig<B> {
    /// Backend streams are seeded from and written to.
    pub backend: B,

    /// Policy for requests that retype a live key. Defaults to
    /// [`TypeMismatchPolicy::Shadow`].
    pub type_mismatch: Option<TypeMismatchPolicy>,

    /// Delay before an observable stream's mutation is mirrored to the
    /// backend. Defaults to 250 milliseconds; zero writes synchronously.
    pub debounce: Option<Duration>,
}

#[derive(Clone, Copy, Debug)]
enum Kind {
    Storage,
    Observable,
}

struct Entry {
    type_id: TypeId,
    value_type: &'static str,
    stream: Weak<dyn ErasedStream>,
}

impl Entry {
    fn is_alive(&self) -> bool {
        self.stream.strong_count() > 0
    }
}

struct Slots<K> {
    entries: HashMap<K, Entry>,
    sweep_at: usize,
}

impl<K: Key> Slots<K> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at: MIN_SWEEP_THRESHOLD,
        }
    }

    fn insert(&mut self, key: K, entry: Entry) {
        self.entries.insert(key, entry);

        if self.entries.len() >= self.sweep_at {
            self.sweep();
            self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_THRESHOLD);
        }
    }

    fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_alive());
        before - self.entries.len()
    }

    fn live(&self) -> impl Iterator<Item = Arc<dyn ErasedStream>> + '_ {
        self.entries
            .values()
            .filter_map(|entry| entry.stream.upgrade())
    }
}

struct Entries<K> {
    storage: Slots<K>,
    observable: Slots<K>,
}

impl<K> Entries<K> {
    fn slots(&self, kind: Kind) -> &Slots<K> {
        match kind {
            Kind::Storage => &self.storage,
            Kind::Observable => &self.observable,
        }
    }

    fn slots_mut(&mut self, kind: Kind) -> &mut Slots<K> {
        match kind {
            Kind::Storage => &mut self.storage,
            Kind::Observable => &mut self.observable,
        }
    }
}

struct Inner<K, B> {
    backend: Arc<B>,
    type_mismatch: TypeMismatchPolicy,
    write_behind: WriteBehind,
    // Re-entrant so that a subscriber fired while the lock is held (by
    // `clear_all`) may itself ask the registry for a stream. The `RefCell` is
    // never borrowed across a call out of the registry.
    entries: ReentrantMutex<RefCell<Entries<K>>>,
}

/// Hands out at most one live stream per key, seeded from and written through
/// to a backend.
///
/// The registry only keeps weak references: a stream lives as long as its
/// holders do, and a request after the last holder let go mints a fresh stream
/// seeded from the backend. Cloning a registry is cheap and yields a handle to
/// the same streams.
pub struct Registry<K, B> {
    inner: Arc<Inner<K, B>>,
}

impl<K, B> Clone for Registry<K, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, B> Registry<K, B>
where
    K: Key,
    B: Backend<K>,
{
    /// Creates a registry from its configuration.
    #[must_use]
    pub fn new(
        RegistryConfig {
            backend,
            type_mismatch,
            debounce,
        }: RegistryConfig<B>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: Arc::new(backend),
                type_mismatch: type_mismatch.unwrap_or_default(),
                write_behind: WriteBehind::new(debounce.unwrap_or(DEFAULT_DEBOUNCE)),
                entries: ReentrantMutex::new(RefCell::new(Entries {
                    storage: Slots::new(),
                    observable: Slots::new(),
                })),
            }),
        }
    }

    /// Creates a registry over `backend` with the default configuration.
    #[must_use]
    pub fn from_backend(backend: B) -> Self {
        Self::new(RegistryConfig {
            backend,
            type_mismatch: None,
            debounce: None,
        })
    }

    /// The backend streams are seeded from and written to.
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    /// Returns the live stream for `key`, or mints one seeded from the backend
    /// whose every store is written through to it.
    ///
    /// Concurrent callers for the same key receive the same stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the live stream for `key` holds
    /// another type and the registry rejects retyping.
    pub fn stream_for<V: Value>(&self, key: K) -> Result<Arc<StorageStream<V>>, Error> {
        self.get_or_mint(Kind::Storage, key, type_name::<V>(), |key| {
            let seed = self.inner.backend.read::<V>(key);
            let backend = Arc::clone(&self.inner.backend);
            let hook_key = key.clone();

            Arc::new(StorageStream::with_hook(
                seed,
                Box::new(move |value: Option<&V>| backend.write(&hook_key, value)),
            ))
        })
    }

    /// Returns the live observable stream for `key`, or mints one seeded from
    /// the backend whose every set is mirrored to it after the debounce delay.
    ///
    /// Observable streams are tracked apart from storage streams: the same key
    /// may have one of each.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the live observable stream for `key`
    /// holds another type and the registry rejects retyping.
    pub fn observable_stream_for<V: Value>(
        &self,
        key: K,
    ) -> Result<Arc<ObservableStream<V>>, Error> {
        self.get_or_mint(Kind::Observable, key, type_name::<V>(), |key| {
            let seed = self.inner.backend.read::<V>(key);
            let backend = Arc::clone(&self.inner.backend);
            let write_behind = self.inner.write_behind.clone();
            let hook_key = key.clone();
            let id = StreamId::next();

            Arc::new(ObservableStream::with_hook(
                id,
                seed,
                Box::new(move |value: Option<&V>| {
                    let backend = Arc::clone(&backend);
                    let key = hook_key.clone();
                    let value = value.cloned();
                    write_behind.schedule(id, move || backend.write(&key, value.as_ref()));
                }),
            ))
        })
    }

    /// Resets every live stream to "no value", which deletes its record, then
    /// clears the backend, including records no stream is live for.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if it could not be cleared. Live streams
    /// have been reset by then.
    pub fn clear_all(&self) -> Result<(), B::Error> {
        let guard = self.inner.entries.lock();

        let live: Vec<Arc<dyn ErasedStream>> = {
            let entries = guard.borrow();
            entries
                .storage
                .live()
                .chain(entries.observable.live())
                .collect()
        };
        info!(live = live.len(), "clearing all streams");

        for stream in &live {
            stream.reset();
        }

        // A late debounced write must not resurrect a cleared record.
        self.inner.write_behind.flush();
        self.inner.backend.clear()
    }

    /// Waits until every deferred observable-stream write has reached the
    /// backend.
    pub fn flush(&self) {
        self.inner.write_behind.flush();
    }

    /// Number of live streams of either kind.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        let guard = self.inner.entries.lock();
        let entries = guard.borrow();
        entries.storage.live().count() + entries.observable.live().count()
    }

    /// Drops registry entries whose stream has been released, returning how
    /// many were dropped.
    pub fn sweep(&self) -> usize {
        let guard = self.inner.entries.lock();
        let mut entries = guard.borrow_mut();
        entries.storage.sweep() + entries.observable.sweep()
    }

    fn get_or_mint<S, F>(
        &self,
        kind: Kind,
        key: K,
        value_type: &'static str,
        mint: F,
    ) -> Result<Arc<S>, Error>
    where
        S: ErasedStream + 'static,
        F: FnOnce(&K) -> Arc<S>,
    {
        // Held for the whole lookup-or-mint so that racing callers for an
        // absent key cannot mint two streams.
        let guard = self.inner.entries.lock();

        let live = {
            let entries = guard.borrow();
            entries
                .slots(kind)
                .entries
                .get(&key)
                .and_then(|entry| {
                    entry
                        .stream
                        .upgrade()
                        .map(|stream| (entry.type_id, entry.value_type, stream))
                })
        };

        if let Some((type_id, live_type, stream)) = live {
            if type_id == TypeId::of::<S>() {
                if let Ok(stream) = stream.into_any().downcast::<S>() {
                    return Ok(stream);
                }
            } else if self.inner.type_mismatch == TypeMismatchPolicy::Reject {
                warn!(?key, live = live_type, requested = value_type, "rejected retyping of live key");
                return Err(Error::TypeMismatch {
                    key: format!("{key:?}"),
                    requested: value_type,
                    live: live_type,
                });
            } else {
                debug!(?key, live = live_type, requested = value_type, "shadowing live stream");
            }
        }

        let stream = mint(&key);
        debug!(?key, ?kind, value_type, "minted stream");

        let erased: Arc<dyn ErasedStream> = stream.clone();
        guard.borrow_mut().slots_mut(kind).insert(
            key,
            Entry {
                type_id: TypeId::of::<S>(),
                value_type,
                stream: Arc::downgrade(&erased),
            },
        );

        Ok(stream)
    }
}

impl<K, B: Debug> Debug for Registry<K, B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("backend", &self.inner.backend)
            .field("type_mismatch", &self.inner.type_mismatch)
            .field("write_behind", &self.inner.write_behind)
            .finish_non_exhaustive()
    }
}
