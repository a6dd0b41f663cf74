//! File-based storage backend for persistent storage.

use crate::backend::Storage;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// The whole key-value map is kept in memory and mirrored to a single JSON
/// object on disk. Every mutation rewrites the file through a sibling
/// temporary file followed by a rename, so a crash leaves either the old or
/// the new image, never a torn one. A failed write leaves the in-memory
/// map untouched.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
/// Internal locking serializes writers.
///
/// # Example
///
/// ```no_run
/// use entigraph_storage::{FileStorage, Storage};
/// use std::path::Path;
///
/// let storage = FileStorage::open(Path::new("data.json")).unwrap();
/// storage.insert("person@1", "{}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists its contents are loaded; an empty file is treated
    /// as an empty store. A missing file is created on the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a JSON
    /// object of strings.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let data = if path.exists() {
            let raw = fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    StorageError::Corrupted(format!("{}: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be loaded.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        let encoded = serde_json::to_vec(data)
            .map_err(|e| StorageError::Corrupted(format!("encode failed: {e}")))?;

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn insert(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        let mut next = data.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *data = next;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        if !data.contains_key(key) {
            return Err(StorageError::key_not_found(key));
        }
        let mut next = data.clone();
        next.remove(key);
        self.persist(&next)?;
        *data = next;
        Ok(())
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
    use tempfile::tempdir;

    #[test]
    fn file_open_missing_is_empty() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(&dir.path().join("db.json")).unwrap();
        assert!(storage.is_empty().unwrap());
    }

    #[test]
    fn file_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.insert("person@1", r#"{"name":"John"}"#).unwrap();
            storage.insert("_next_id", "2").unwrap();
        }

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(
            reopened.get("person@1").unwrap().as_deref(),
            Some(r#"{"name":"John"}"#)
        );
        assert_eq!(reopened.len().unwrap(), 2);
    }

    #[test]
    fn file_remove_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.insert("a", "1").unwrap();
        storage.remove("a").unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert!(reopened.get("a").unwrap().is_none());
    }

    #[test]
    fn file_remove_missing_fails() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(&dir.path().join("db.json")).unwrap();
        assert!(matches!(
            storage.remove("nope"),
            Err(StorageError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn file_garbage_is_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "not json").unwrap();

        let result = FileStorage::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_create_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("db.json");
        let storage = FileStorage::open_with_create_dirs(&path).unwrap();
        storage.insert("k", "v").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_failed_write_keeps_memory_in_sync() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        let storage = FileStorage::open_with_create_dirs(&nested.join("db.json")).unwrap();
        storage.insert("a", "1").unwrap();

        fs::remove_dir_all(&nested).unwrap();

        assert!(storage.insert("k", "v").is_err());
        assert!(storage.get("k").unwrap().is_none());

        assert!(storage.remove("a").is_err());
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.items().unwrap(), vec![("a".to_string(), "1".to_string())]);
    }
}
