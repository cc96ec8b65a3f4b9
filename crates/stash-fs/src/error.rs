use stash::BackendError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The key cannot be mapped to a file inside the store's directory.
    #[error("invalid key `{0}`")]
    InvalidKey(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
}

impl BackendError for Error {}
