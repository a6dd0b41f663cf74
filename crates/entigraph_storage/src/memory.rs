//! In-memory storage backend.

use crate::backend::Storage;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory storage backend.
///
/// This is the reference implementation of [`Storage`] and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Embedded hosts whose durability is handled elsewhere
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use entigraph_storage::{InMemoryStorage, Storage};
///
/// let storage = InMemoryStorage::new();
/// storage.insert("a", "1").unwrap();
/// assert_eq!(storage.len().unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with the given pairs.
    ///
    /// Useful for testing how the engine treats pre-existing state.
    #[must_use]
    pub fn with_items<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            data: RwLock::new(
                items
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Returns a copy of all stored pairs.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.data.read().clone()
    }

    /// Clears all data from the backend.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl Storage for InMemoryStorage {
    fn insert(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        match self.data.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::key_not_found(key)),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }

    fn items(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.data.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.len().unwrap(), 0);
        assert!(storage.is_empty().unwrap());
        assert!(storage.keys().unwrap().is_empty());
    }

    #[test]
    fn memory_insert_and_get() {
        let storage = InMemoryStorage::new();
        storage.insert("person@1", "alice").unwrap();

        assert_eq!(storage.get("person@1").unwrap().as_deref(), Some("alice"));
        assert!(storage.get("person@2").unwrap().is_none());
    }

    #[test]
    fn memory_insert_overwrites() {
        let storage = InMemoryStorage::new();
        storage.insert("k", "v1").unwrap();
        storage.insert("k", "v2").unwrap();

        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(storage.len().unwrap(), 1);
    }

    #[test]
    fn memory_remove_existing() {
        let storage = InMemoryStorage::new();
        storage.insert("k", "v").unwrap();
        storage.remove("k").unwrap();

        assert!(!storage.contains("k").unwrap());
    }

    #[test]
    fn memory_remove_missing_fails() {
        let storage = InMemoryStorage::new();
        let result = storage.remove("missing");
        assert!(matches!(result, Err(StorageError::KeyNotFound { key }) if key == "missing"));
    }

    #[test]
    fn memory_items_lists_all_pairs() {
        let storage = InMemoryStorage::with_items([("a", "1"), ("b", "2")]);
        let mut items = storage.items().unwrap();
        items.sort();

        assert_eq!(
            items,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn memory_clear() {
        let storage = InMemoryStorage::with_items([("a", "1")]);
        storage.clear();
        assert!(storage.is_empty().unwrap());
    }
}
