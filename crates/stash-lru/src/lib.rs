//! Bounded object-cache backend for stash registries.
//!
//! Holds typed values, without encoding, in a least-recently-used cache of
//! fixed capacity. Evicted and mistyped values read as absent; nothing is ever
//! reported, matching the best-effort nature of a cache.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::any::Any;
use std::convert::Infallible;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use stash::{Backend, Key, Value};
use tracing::trace;

type Slot = Box<dyn Any + Send + Sync>;

/// Least-recently-used backend.
pub struct LruBackend<K: Key> {
    cache: Arc<Mutex<LruCache<K, Slot>>>,
}

impl<K: Key> LruBackend<K> {
    /// Creates a backend holding at most `capacity` values.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Maximum number of values held.
    #[must_use]
    pub fn capacity(&self) -> NonZeroUsize {
        self.cache.lock().cap()
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether no value is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl<K: Key> Clone for LruBackend<K> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<K: Key> Debug for LruBackend<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("LruBackend")
            .field("len", &cache.len())
            .field("capacity", &cache.cap())
            .finish()
    }
}

impl<K: Key> Backend<K> for LruBackend<K> {
    type Error = Infallible;

    fn read<V: Value>(&self, key: &K) -> Option<V> {
        let mut cache = self.cache.lock();
        let slot = cache.get(key)?;
        let value: &(dyn Any + Send + Sync) = &**slot;
        value.downcast_ref::<V>().cloned()
    }

    fn write<V: Value>(&self, key: &K, value: Option<&V>) {
        let mut cache = self.cache.lock();
        match value {
            Some(value) => {
                if let Some((evicted, _)) = cache.push(key.clone(), Box::new(value.clone())) {
                    if &evicted != key {
                        trace!(key = ?evicted, "evicted least recently used value");
                    }
                }
            }
            None => {
                cache.pop(key);
            }
        }
    }

    fn clear(&self) -> Result<(), Self::Error> {
        self.cache.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(capacity: usize) -> LruBackend<String> {
        LruBackend::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_write_and_read() {
        let backend = backend(4);

        backend.write(&"avatar".to_string(), Some(&vec![1_u8, 2, 3]));

        assert_eq!(
            backend.read::<Vec<u8>>(&"avatar".to_string()),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let backend = backend(2);

        backend.write(&"a".to_string(), Some(&1_u32));
        backend.write(&"b".to_string(), Some(&2_u32));
        // Touch "a" so that "b" becomes the eviction candidate.
        assert_eq!(backend.read::<u32>(&"a".to_string()), Some(1));
        backend.write(&"c".to_string(), Some(&3_u32));

        assert_eq!(backend.len(), 2);
        assert_eq!(backend.read::<u32>(&"b".to_string()), None);
        assert_eq!(backend.read::<u32>(&"a".to_string()), Some(1));
        assert_eq!(backend.read::<u32>(&"c".to_string()), Some(3));
    }

    #[test]
    fn test_mistyped_read_is_a_miss() {
        let backend = backend(2);

        backend.write(&"a".to_string(), Some(&1_u32));

        assert_eq!(backend.read::<String>(&"a".to_string()), None);
        assert_eq!(backend.read::<u32>(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_write_none_and_clear() {
        let backend = backend(4);
        backend.write(&"a".to_string(), Some(&1_u32));
        backend.write(&"b".to_string(), Some(&2_u32));

        backend.write::<u32>(&"a".to_string(), None);
        assert_eq!(backend.len(), 1);

        backend.clear().unwrap();
        assert!(backend.is_empty());
        assert_eq!(backend.capacity().get(), 4);
    }
}
