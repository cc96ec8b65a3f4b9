use stash::BackendError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The persisted domain file could not be decoded.
    #[error("failed to decode preference domain: {0}")]
    Decode(String),

    /// The domain could not be encoded for persisting.
    #[error("failed to encode preference domain: {0}")]
    Encode(String),

    /// The store has no domain, so it cannot be reset.
    #[error("no preference domain to reset")]
    DomainUnavailable,

    /// The domain is not a plain file name.
    #[error("invalid preference domain `{0}`")]
    InvalidDomain(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
}

impl BackendError for Error {}
