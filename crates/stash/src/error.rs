use std::error::Error as StdError;

use thiserror::Error;

/// Errors raised by the registry and reported by backends to their error sink.
#[derive(Debug, Error)]
pub enum Error {
    /// Persisted bytes could not be decoded as the requested type.
    #[error("failed to decode `{key}`: {message}")]
    Decode {
        /// Key of the corrupt record.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// A value could not be serialized.
    #[error("failed to encode `{key}`: {message}")]
    Encode {
        /// Key of the value that was being written.
        key: String,
        /// Encoder message.
        message: String,
    },

    /// A backend held a value of another type than the one requested.
    #[error("value stored at `{key}` is not a `{expected}`")]
    IncorrectType {
        /// Key of the record.
        key: String,
        /// Requested type.
        expected: &'static str,
    },

    /// A byte store operation failed.
    #[error("store {operation} failed for `{key}`")]
    Store {
        /// Which store operation failed (`get`, `put`, `del`).
        operation: &'static str,
        /// Key the operation was addressing.
        key: String,
        /// Underlying store error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A stream was requested at a type other than the one of the live stream
    /// for the same key, and the registry rejects retyping.
    #[error("`{key}` is live as `{live}` but was requested as `{requested}`")]
    TypeMismatch {
        /// Debug rendering of the key.
        key: String,
        /// Value type of the request.
        requested: &'static str,
        /// Value type of the live stream.
        live: &'static str,
    },
}
