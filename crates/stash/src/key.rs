use std::borrow::Cow;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Anything usable as a registry key.
///
/// Blanket-implemented for every hashable, comparable, cloneable type that can
/// cross threads.
pub trait Key: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

impl<T> Key for T where T: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

/// String projection of a key, required by backends that address records by
/// name (files, preference domains, credential vaults).
///
/// Two keys that are equal must project to the same name.
pub trait KeyName {
    /// The name records for this key are stored under.
    fn key_name(&self) -> Cow<'_, str>;
}

impl KeyName for String {
    fn key_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl KeyName for &'static str {
    fn key_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl KeyName for Cow<'static, str> {
    fn key_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl KeyName for Box<str> {
    fn key_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl KeyName for Arc<str> {
    fn key_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}
