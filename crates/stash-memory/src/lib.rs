//! Volatile (process-lifetime) backend for stash registries.
//!
//! Values are kept as-is, without encoding, so reads never fail to decode. A
//! read at a key holding a value of another type is reported and treated as
//! absent.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;
use stash::{Backend, Error, ErrorSink, Key, TracingSink, Value};
use tracing::trace;

type Slot = Box<dyn Any + Send + Sync>;

/// In-memory backend.
pub struct MemoryBackend<K> {
    map: Arc<Mutex<HashMap<K, Slot>>>,
    sink: Arc<dyn ErrorSink>,
}

impl<K: Key> MemoryBackend<K> {
    /// Creates a new `MemoryBackend`, logging type mismatches through
    /// `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// Creates a new `MemoryBackend` reporting type mismatches to `sink`.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            map: Arc::new(Mutex::new(HashMap::new())),
            sink,
        }
    }

    /// Whether a value is held for `key`.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.map.lock().contains_key(key)
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether no value is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl<K: Key> Default for MemoryBackend<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for MemoryBackend<K> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<K> Debug for MemoryBackend<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("len", &self.map.lock().len())
            .finish_non_exhaustive()
    }
}

impl<K: Key> Backend<K> for MemoryBackend<K> {
    type Error = Infallible;

    fn read<V: Value>(&self, key: &K) -> Option<V> {
        let found = {
            let map = self.map.lock();
            let slot = map.get(key)?;
            let value: &(dyn Any + Send + Sync) = &**slot;
            value.downcast_ref::<V>().cloned()
        };

        if found.is_none() {
            self.sink.report(&Error::IncorrectType {
                key: format!("{key:?}"),
                expected: type_name::<V>(),
            });
        }

        found
    }

    fn write<V: Value>(&self, key: &K, value: Option<&V>) {
        trace!(?key, delete = value.is_none(), "writing value");

        let mut map = self.map.lock();
        match value {
            Some(value) => {
                map.insert(key.clone(), Box::new(value.clone()));
            }
            None => {
                map.remove(key);
            }
        }
    }

    fn clear(&self) -> Result<(), Self::Error> {
        self.map.lock().clear();
        Ok(())
    }
}
