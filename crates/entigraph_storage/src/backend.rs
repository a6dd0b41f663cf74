//! Storage contract definition.

use crate::error::StorageResult;

/// A key-value storage backend.
///
/// Backends are **opaque string stores**. The database engine owns key
/// construction and value encoding; a backend only has to remember what it
/// was given.
///
/// # Invariants
///
/// - `insert` creates or overwrites
/// - `get` returns exactly the value last inserted under the key
/// - `remove` fails with [`crate::StorageError::KeyNotFound`] for absent keys
/// - `keys` and `items` carry no ordering guarantee
///
/// Methods take `&self`; implementations use interior locking so a backend
/// can sit behind an `Arc` shared by many entity handles.
///
/// # Implementors
///
/// - [`super::InMemoryStorage`] - For testing and ephemeral stores
/// - [`super::FileStorage`] - For persistent stores
pub trait Storage: Send + Sync {
    /// Inserts a value, replacing any previous value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot persist the write.
    fn insert(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent, or a backend error if the
    /// removal cannot be persisted.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns every stored key, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Returns every stored key/value pair, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn items(&self) -> StorageResult<Vec<(String, String)>>;

    /// Returns whether `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns the number of stored keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn len(&self) -> StorageResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Returns whether the backend holds no keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
