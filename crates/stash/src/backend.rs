use std::convert::Infallible;
use std::error::Error;
use std::fmt::Debug;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Key;

/// Anything a stream can hold.
pub trait Value: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Marker trait for backend and store errors.
pub trait BackendError: Debug + Error + Send + Sync + 'static {}

impl BackendError for Infallible {}

/// A typed persistence strategy a registry reads seeds from and writes
/// mutations to.
///
/// # Required Methods
/// - `read`: Returns the last persisted value, or `None` if there is none or it
///   cannot be decoded as `V`. Decode failures are reported, never returned.
/// - `write`: Persists a value, or deletes the record on `None`. Failures are
///   reported, never returned.
/// - `clear`: Deletes every record owned by this backend.
pub trait Backend<K: Key>: Send + Sync + 'static {
    /// Error returned when the backend cannot be cleared.
    type Error: BackendError;

    /// Reads the value persisted for `key`.
    fn read<V: Value>(&self, key: &K) -> Option<V>;

    /// Persists `value` for `key`, deleting the record when it is `None`.
    fn write<V: Value>(&self, key: &K, value: Option<&V>);

    /// Deletes every record, whether or not a stream is live for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend's namespace is unavailable or its
    /// records could not be removed.
    fn clear(&self) -> Result<(), Self::Error>;
}

/// A string-addressed byte store.
///
/// # Required Methods
/// - `del`: Deletes a key from the store. Deleting an absent key succeeds.
/// - `get`: Retrieves the bytes stored for a key.
/// - `keys`: Retrieves all keys in the store.
/// - `put`: Stores a key-value pair, replacing any previous value.
pub trait Store: Send + Sync + 'static {
    /// Error type of every store operation.
    type Error: BackendError;

    /// Deletes a key from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but could not be removed.
    fn del(&self, key: &str) -> Result<(), Self::Error>;

    /// Retrieves the bytes stored for a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but could not be read.
    fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error>;

    /// Retrieves all keys in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be enumerated.
    fn keys(&self) -> Result<Vec<String>, Self::Error>;

    /// Stores a key-value pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error>;

    /// Deletes every record in the store.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while enumerating or deleting.
    fn clear(&self) -> Result<(), Self::Error> {
        for key in self.keys()? {
            self.del(&key)?;
        }

        Ok(())
    }
}
