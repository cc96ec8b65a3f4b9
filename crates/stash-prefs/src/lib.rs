//! Preference-domain storage: a flat, string-keyed namespace of small values.
//!
//! A store either lives only in memory or persists its whole domain as one
//! CBOR file, `<dir>/<domain>.prefs`, which is atomically rewritten on every
//! change. Resetting a store with [`Store::clear`] drops its whole domain and
//! therefore needs one; a store without a domain cannot be reset.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use stash::{Encoded, Store};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Extension of persisted domain files.
pub const EXTENSION: &str = "prefs";

/// Typed backend over a [`PrefsStore`].
pub type PrefsBackend = Encoded<PrefsStore>;

type Values = BTreeMap<String, Bytes>;

/// Preference store.
#[derive(Debug)]
pub struct PrefsStore {
    domain: Option<String>,
    path: Option<PathBuf>,
    values: Mutex<Values>,
}

impl PrefsStore {
    /// Creates an in-memory store without a domain. It can be read and
    /// written, but not reset.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            domain: None,
            path: None,
            values: Mutex::new(Values::new()),
        }
    }

    /// Creates an in-memory store for `domain`.
    pub fn in_memory(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            path: None,
            values: Mutex::new(Values::new()),
        }
    }

    /// Opens the persisted store for `domain` under `dir`, loading any values
    /// persisted by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if `domain` is not a plain file name, or if an existing
    /// domain file cannot be read or decoded.
    pub fn open(dir: impl AsRef<Path>, domain: impl Into<String>) -> Result<Self, Error> {
        let domain = domain.into();
        let mut components = Path::new(&domain).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::InvalidDomain(domain));
        }
        let path = dir.as_ref().join(format!("{domain}.{EXTENSION}"));

        let values: Values = match fs::read(&path) {
            Ok(data) => ciborium::de::from_reader(data.as_slice())
                .map_err(|e| Error::Decode(e.to_string()))?,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Values::new(),
            Err(e) => return Err(Error::Io("error reading domain file", e)),
        };
        debug!(%domain, values = values.len(), "opened preference domain");

        Ok(Self {
            domain: Some(domain),
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// The domain of this store, if it has one.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    fn persist(&self, values: &Values) -> Result<(), Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(dir) = path.parent() else {
            return Ok(());
        };

        let mut buffer = Vec::new();
        ciborium::ser::into_writer(values, &mut buffer)
            .map_err(|e| Error::Encode(e.to_string()))?;

        fs::create_dir_all(dir).map_err(|e| Error::Io("error creating directory", e))?;
        let mut file =
            NamedTempFile::new_in(dir).map_err(|e| Error::Io("error creating file", e))?;
        file.write_all(&buffer)
            .map_err(|e| Error::Io("error writing file", e))?;
        file.persist(path)
            .map_err(|e| Error::Io("error replacing file", e.error))?;
        Ok(())
    }
}

impl Store for PrefsStore {
    type Error = Error;

    fn del(&self, key: &str) -> Result<(), Self::Error> {
        let mut values = self.values.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.values.lock().keys().cloned().collect())
    }

    fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), bytes);
        self.persist(&values)
    }

    fn clear(&self) -> Result<(), Self::Error> {
        let Some(domain) = &self.domain else {
            return Err(Error::DomainUnavailable);
        };
        info!(%domain, "resetting preference domain");

        self.values.lock().clear();
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io("error deleting domain file", e)),
            }
        }
        Ok(())
    }
}
