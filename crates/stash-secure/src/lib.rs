//! Sealed-file storage for secrets.
//!
//! Every value is sealed with AES-256-GCM under a master key and written to
//! its own file. File names are the hex SHA-256 digest of the service and key,
//! so the directory listing reveals neither. The service and key are bound to
//! the ciphertext as associated data: a record moved to another name, or
//! sealed under another master key, fails to open instead of yielding a value.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{Debug, Formatter};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stash::{Encoded, Store};
use tempfile::NamedTempFile;
use tracing::{trace, warn};

/// Extension of sealed record files.
pub const EXTENSION: &str = "sealed";

const NONCE_LEN: usize = 12;

/// Typed backend over a [`SecureStore`].
pub type SecureBackend = Encoded<SecureStore>;

/// Configuration for a [`SecureStore`].
pub struct SecureStoreConfig {
    /// Directory holding the sealed records. Created on first write.
    pub dir: PathBuf,

    /// 256-bit key every record is sealed under.
    pub master_key: [u8; 32],

    /// Namespace separating the records of different applications sharing one
    /// directory.
    pub service: String,
}

#[derive(Deserialize, Serialize)]
struct SealedRecord {
    service: String,
    key: String,
    nonce: Bytes,
    ciphertext: Bytes,
}

/// Secret store sealing every value under a master key.
pub struct SecureStore {
    cipher: Aes256Gcm,
    dir: PathBuf,
    service: String,
}

impl SecureStore {
    /// Creates a new `SecureStore`.
    #[must_use]
    pub fn new(
        SecureStoreConfig {
            dir,
            master_key,
            service,
        }: SecureStoreConfig,
    ) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master_key)),
            dir,
            service,
        }
    }

    /// The directory records are stored under.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The service records are sealed for.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    fn associated_data(&self, key: &str) -> String {
        format!("{}\0{key}", self.service)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(self.associated_data(key).as_bytes());
        self.dir
            .join(format!("{}.{EXTENSION}", hex::encode(digest)))
    }

    fn read_record(path: &Path) -> Result<Option<SealedRecord>, Error> {
        match fs::read(path) {
            Ok(data) => ciborium::de::from_reader(data.as_slice())
                .map(Some)
                .map_err(|e| Error::Decode(e.to_string())),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("error reading file", e)),
        }
    }
}

impl Debug for SecureStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("dir", &self.dir)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Store for SecureStore {
    type Error = Error;

    fn del(&self, key: &str) -> Result<(), Self::Error> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io("error deleting file", e)),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        let Some(record) = Self::read_record(&self.record_path(key))? else {
            return Ok(None);
        };
        if record.service != self.service || record.key != key {
            return Err(Error::Misplaced(key.to_string()));
        }
        if record.nonce.len() != NONCE_LEN {
            return Err(Error::Decode(format!(
                "nonce of {} bytes, expected {NONCE_LEN}",
                record.nonce.len()
            )));
        }

        let aad = self.associated_data(key);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&record.nonce),
                Payload {
                    msg: &record.ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| Error::Open(key.to_string()))?;

        Ok(Some(Bytes::from(plaintext)))
    }

    fn keys(&self) -> Result<Vec<String>, Self::Error> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io("error reading directory", e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::Io("error reading directory entry", e))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }

            match Self::read_record(&path) {
                Ok(Some(record)) if record.service == self.service => keys.push(record.key),
                Ok(_) => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable sealed record");
                }
            }
        }

        Ok(keys)
    }

    fn put(&self, key: &str, bytes: Bytes) -> Result<(), Self::Error> {
        let aad = self.associated_data(key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &bytes,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| Error::Seal(key.to_string()))?;

        let record = SealedRecord {
            service: self.service.clone(),
            key: key.to_string(),
            nonce: Bytes::copy_from_slice(nonce.as_slice()),
            ciphertext: Bytes::from(ciphertext),
        };
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(&record, &mut buffer)
            .map_err(|e| Error::Encode(e.to_string()))?;

        fs::create_dir_all(&self.dir).map_err(|e| Error::Io("error creating directory", e))?;
        let mut file =
            NamedTempFile::new_in(&self.dir).map_err(|e| Error::Io("error creating file", e))?;
        file.write_all(&buffer)
            .map_err(|e| Error::Io("error writing file", e))?;
        file.persist(self.record_path(key))
            .map_err(|e| Error::Io("error replacing file", e.error))?;

        trace!(service = %self.service, key, "sealed value");
        Ok(())
    }
}

/// Generates a random master key.
#[must_use]
pub fn generate_key() -> [u8; 32] {
    let generated = Aes256Gcm::generate_key(&mut OsRng);
    let mut key = [0_u8; 32];
    key.copy_from_slice(generated.as_slice());
    key
}
