use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::{Backend, Error, ErrorSink, Key, KeyName, Store, TracingSink, Value};

/// Serializes a value to CBOR.
///
/// # Errors
///
/// Returns the encoder's message if the value cannot be serialized.
pub fn encode<V: Serialize>(value: &V) -> Result<Bytes, String> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer).map_err(|e| e.to_string())?;
    Ok(Bytes::from(buffer))
}

/// Deserializes a value from CBOR.
///
/// # Errors
///
/// Returns the decoder's message if the bytes do not describe a `V`.
pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V, String> {
    ciborium::de::from_reader(bytes).map_err(|e| e.to_string())
}

/// Adapts a byte [`Store`] into a typed [`Backend`] by encoding values as CBOR.
///
/// Store, encode and decode failures are reported to the error sink and
/// absorbed; only [`Backend::clear`] surfaces the store's error.
pub struct Encoded<S> {
    store: S,
    sink: Arc<dyn ErrorSink>,
}

impl<S: Store> Encoded<S> {
    /// Wraps a store, logging failures through `tracing`.
    pub fn new(store: S) -> Self {
        Self::with_sink(store, Arc::new(TracingSink))
    }

    /// Wraps a store, reporting failures to `sink`.
    pub fn with_sink(store: S, sink: Arc<dyn ErrorSink>) -> Self {
        Self { store, sink }
    }

    /// The wrapped store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn report_store_error(&self, operation: &'static str, key: &str, error: S::Error) {
        self.sink.report(&Error::Store {
            operation,
            key: key.to_owned(),
            source: Box::new(error),
        });
    }
}

impl<S: Debug> Debug for Encoded<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoded")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<K, S> Backend<K> for Encoded<S>
where
    K: Key + KeyName,
    S: Store,
{
    type Error = S::Error;

    fn read<V: Value>(&self, key: &K) -> Option<V> {
        let name = key.key_name();
        trace!(key = %name, "reading record");

        let bytes = match self.store.get(&name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.report_store_error("get", &name, e);
                return None;
            }
        };

        match decode(&bytes) {
            Ok(value) => Some(value),
            Err(message) => {
                self.sink.report(&Error::Decode {
                    key: name.into_owned(),
                    message,
                });
                None
            }
        }
    }

    fn write<V: Value>(&self, key: &K, value: Option<&V>) {
        let name = key.key_name();
        trace!(key = %name, delete = value.is_none(), "writing record");

        let Some(value) = value else {
            if let Err(e) = self.store.del(&name) {
                self.report_store_error("del", &name, e);
            }
            return;
        };

        match encode(value) {
            Ok(bytes) => {
                if let Err(e) = self.store.put(&name, bytes) {
                    self.report_store_error("put", &name, e);
                }
            }
            Err(message) => self.sink.report(&Error::Encode {
                key: name.into_owned(),
                message,
            }),
        }
    }

    fn clear(&self) -> Result<(), Self::Error> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::convert::Infallible;
    use std::sync::Mutex;

    use serde::{Deserialize, Serializer};

    use crate::{BackendError, Registry};

    #[derive(Debug, Default)]
    struct MapStore {
        map: Mutex<BTreeMap<String, Bytes>>,
    }

    impl Store for MapStore {
        type Error = Infallible;

        fn del(&self, key: &str) -> Result<(), Self::Error> {
            self.map.lock().unwrap().remove(key);
            Ok(())
        }

        fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
            Ok(self.map.lock().unwrap().get(key).cloned())
        }

        fn keys(&self) -> Result<Vec<String>, Self::Error> {
            Ok(self.map.lock().unwrap().keys().cloned().collect())
        }

        fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error> {
            self.map.lock().unwrap().insert(key.to_string(), bytes);
            Ok(())
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u8,
    }

    fn recording() -> (Arc<Mutex<Vec<String>>>, Arc<dyn ErrorSink>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let reports = Arc::clone(&reports);
            move |error: &Error| reports.lock().unwrap().push(error.to_string())
        };
        (reports, Arc::new(sink))
    }

    #[test]
    fn test_write_then_read() {
        let backend = Encoded::new(MapStore::default());
        let profile = Profile {
            name: "Ada".to_string(),
            age: 36,
        };

        backend.write(&"profile", Some(&profile));

        assert_eq!(backend.read::<Profile>(&"profile"), Some(profile));
    }

    #[test]
    fn test_write_none_deletes() {
        let backend = Encoded::new(MapStore::default());

        backend.write(&"age", Some(&10_u32));
        backend.write::<u32>(&"age", None);

        assert_eq!(backend.read::<u32>(&"age"), None);
        assert!(backend.store().keys().unwrap().is_empty());
    }

    #[test]
    fn test_decode_failure_is_reported_and_absent() {
        let (reports, sink) = recording();
        let backend = Encoded::with_sink(MapStore::default(), sink);

        backend.write(&"profile", Some(&"not a profile".to_string()));

        assert_eq!(backend.read::<Profile>(&"profile"), None);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("failed to decode `profile`"));
    }

    #[test]
    fn test_clear_removes_every_record() {
        let backend = Encoded::new(MapStore::default());
        backend.write(&"a", Some(&1_u8));
        backend.write(&"b", Some(&2_u8));

        Backend::<&str>::clear(&backend).unwrap();

        assert_eq!(backend.read::<u8>(&"a"), None);
        assert_eq!(backend.read::<u8>(&"b"), None);
    }

    #[derive(Clone, Debug, Deserialize)]
    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refusing to serialize"))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("store offline")]
    struct Offline;

    impl BackendError for Offline {}

    /// Fails every operation except listing.
    #[derive(Debug)]
    struct OfflineStore;

    impl Store for OfflineStore {
        type Error = Offline;

        fn del(&self, _key: &str) -> Result<(), Self::Error> {
            Err(Offline)
        }

        fn get(&self, _key: &str) -> Result<Option<Bytes>, Self::Error> {
            Err(Offline)
        }

        fn keys(&self) -> Result<Vec<String>, Self::Error> {
            Ok(Vec::new())
        }

        fn put(&self, _key: &str, _bytes: Bytes) -> Result<(), Self::Error> {
            Err(Offline)
        }
    }

    #[test]
    fn test_encode_failure_is_reported_and_skipped() {
        let (reports, sink) = recording();
        let registry = Registry::from_backend(Encoded::with_sink(MapStore::default(), sink));
        let stream = registry.stream_for::<Unencodable>("blob").unwrap();

        stream.store(Some(Unencodable));

        assert!(stream.read().is_some());
        assert!(registry.backend().store().keys().unwrap().is_empty());
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("failed to encode `blob`"));
    }

    #[test]
    fn test_store_failures_are_reported_and_absorbed() {
        let (reports, sink) = recording();
        let backend = Encoded::with_sink(OfflineStore, sink);

        backend.write(&"age", Some(&10_u32));
        assert_eq!(backend.read::<u32>(&"age"), None);
        backend.write::<u32>(&"age", None);

        assert_eq!(
            *reports.lock().unwrap(),
            vec![
                "store put failed for `age`".to_string(),
                "store get failed for `age`".to_string(),
                "store del failed for `age`".to_string(),
            ]
        );
    }

    #[test]
    fn test_store_error_keeps_its_source() {
        let sources = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let sources = Arc::clone(&sources);
            move |error: &Error| {
                let source = std::error::Error::source(error).map(ToString::to_string);
                sources.lock().unwrap().push(source);
            }
        };
        let backend = Encoded::with_sink(OfflineStore, Arc::new(sink));

        assert_eq!(backend.read::<u32>(&"age"), None);

        assert_eq!(
            *sources.lock().unwrap(),
            vec![Some("store offline".to_string())]
        );
    }
}
