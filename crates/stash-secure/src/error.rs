use stash::BackendError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A sealed record could not be decoded.
    #[error("decoding sealed record failed: {0}")]
    Decode(String),

    /// A sealed record could not be encoded.
    #[error("encoding sealed record failed: {0}")]
    Encode(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A sealed record was written for a different key or service.
    #[error("sealed record does not belong to `{0}`")]
    Misplaced(String),

    /// A sealed record could not be opened, usually because it was sealed with
    /// another master key or has been tampered with.
    #[error("opening sealed record for `{0}` failed")]
    Open(String),

    /// A value could not be sealed.
    #[error("sealing value for `{0}` failed")]
    Seal(String),
}

impl BackendError for Error {}
