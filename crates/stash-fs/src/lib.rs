//! Implementation of durable key-value storage using one file per key.
//!
//! Record files are named after their key with a private `.stash` extension.
//! Writes go to a temporary file in the same directory which then atomically
//! replaces the record, so a reader never sees a partially written value.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use stash::{Encoded, Store};
use tempfile::NamedTempFile;
use tracing::debug;

/// Extension of record files. Only files carrying it are listed or cleared.
pub const EXTENSION: &str = "stash";

/// Typed backend over an [`FsStore`].
pub type FsBackend = Encoded<FsStore>;

/// KV store using files on disk.
#[derive(Clone, Debug)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Creates a new `FsStore` with the specified directory. The directory is
    /// created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory records are stored under.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn get_file_path(&self, key: &str) -> Result<PathBuf, Error> {
        let relative = Path::new(key);
        let contained = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !contained {
            return Err(Error::InvalidKey(key.to_string()));
        }

        Ok(self.dir.join(format!("{key}.{EXTENSION}")))
    }
}

impl Store for FsStore {
    type Error = Error;

    fn del(&self, key: &str) -> Result<(), Self::Error> {
        let path = self.get_file_path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io("error deleting file", e)),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        let path = self.get_file_path(key)?;
        match fs::read(path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("error reading file", e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, Self::Error> {
        let mut keys = Vec::new();
        match collect_keys(&self.dir, "", &mut keys) {
            Ok(()) => Ok(keys),
            Err(Error::Io(_, ref e)) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error> {
        let path = self.get_file_path(key)?;
        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent).map_err(|e| Error::Io("error creating directory", e))?;

        let mut file =
            NamedTempFile::new_in(parent).map_err(|e| Error::Io("error creating file", e))?;
        file.write_all(&bytes)
            .map_err(|e| Error::Io("error writing file", e))?;
        file.persist(&path)
            .map_err(|e| Error::Io("error replacing file", e.error))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), Self::Error> {
        let keys = self.keys()?;
        debug!(dir = %self.dir.display(), records = keys.len(), "clearing file store");
        for key in keys {
            self.del(&key)?;
        }
        Ok(())
    }
}

fn collect_keys(dir: &Path, prefix: &str, keys: &mut Vec<String>) -> Result<(), Error> {
    let suffix = format!(".{EXTENSION}");
    let entries = fs::read_dir(dir).map_err(|e| Error::Io("error reading directory", e))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::Io("error reading directory entry", e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let file_type = entry
            .file_type()
            .map_err(|e| Error::Io("error reading file type", e))?;

        if file_type.is_dir() {
            collect_keys(&entry.path(), &format!("{prefix}{name}/"), keys)?;
        } else if let Some(stem) = name.strip_suffix(&suffix) {
            keys.push(format!("{prefix}{stem}"));
        }
    }

    Ok(())
}
