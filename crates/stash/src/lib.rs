//! Observable, write-through key-value streams over pluggable persistence
//! backends.
//!
//! A [`Registry`] hands out at most one live [`StorageStream`] (or
//! [`ObservableStream`]) per key. Streams are seeded from a [`Backend`] when
//! they are first minted and forward every mutation back to it, so every holder
//! of a stream sees the same value and the backend mirrors it.
//!
//! String-addressed backends implement the byte-level [`Store`] contract and
//! are adapted to [`Backend`] with [`Encoded`], which handles CBOR encoding and
//! reports per-value failures to an [`ErrorSink`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod backend;
mod codec;
mod error;
mod key;
mod observable;
mod registry;
mod sink;
mod stream;
mod write_behind;

pub use backend::{Backend, BackendError, Store, Value};
pub use codec::{Encoded, decode, encode};
pub use error::Error;
pub use key::{Key, KeyName};
pub use observable::ObservableStream;
pub use registry::{Registry, RegistryConfig, TypeMismatchPolicy};
pub use sink::{ErrorSink, NullSink, TracingSink};
pub use stream::{StorageStream, StreamId, Subscription};
pub use write_behind::WriteBehind;
