//! Persisted option store. This is the host's key-value configuration store:
//! the signing secret and the dismissed-notice flags both live here.
//!
//! `add` is the only write the provisioner uses for secrets. It inserts a value
//! when the key is absent or holds an empty string, and hands back whatever
//! non-empty value is already stored otherwise, so first-boot writers
//! converge on one secret.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs4::fs_std::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreadable: {0}")]
    Io(String),
    #[error("store contents corrupt: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value contract consumed from the host.
pub trait OptionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Stores `value` unless `key` already holds a non-empty value. Returns
    /// `None` when `value` was written, otherwise the value already present.
    /// Must be atomic with respect to every other writer of the same store.
    fn add(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;

    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Shared insert-unless-present rule for the store implementations.
fn add_to(values: &mut BTreeMap<String, String>, key: &str, value: &str) -> Option<String> {
    match values.get(key) {
        Some(existing) if !existing.is_empty() => Some(existing.clone()),
        _ => {
            values.insert(key.to_string(), value.to_string());
            None
        }
    }
}

/// In-memory store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
        self.values.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl OptionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn add(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        Ok(add_to(&mut *self.lock()?, key, value))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(key).is_some())
    }
}

/// Store backed by a single JSON object on disk.
///
/// Writers take an exclusive advisory lock on a sibling `<file>.lock` for the
/// whole read-modify-write, so separate handles and separate processes see
/// each other's writes. The data file is replaced atomically through a temp
/// file in the same directory, which lets readers skip the lock.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(OsString::from).unwrap_or_else(|| OsString::from("options"));
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Blocks until this handle holds the writer lock. Released on drop.
    fn exclusive(&self) -> Result<File, StoreError> {
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(format!("{}: {e}", dir.display())))?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.lock_path.display())))?;
        lock.lock_exclusive()
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.lock_path.display())))?;
        Ok(lock)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", self.path.display()))),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(values).map_err(|e| StoreError::Corrupt(format!("{e}")))?;
        let mut tmp = NamedTempFile::new_in(self.dir()).map_err(|e| StoreError::Io(format!("{e}")))?;
        tmp.write_all(&body).map_err(|e| StoreError::Io(format!("{e}")))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::Io(format!("{e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl OptionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _lock = self.exclusive()?;
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn add(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let _lock = self.exclusive()?;
        let mut values = self.read_all()?;
        if let Some(existing) = add_to(&mut values, key, value) {
            return Ok(Some(existing));
        }
        self.write_all(&values)?;
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _lock = self.exclusive()?;
        let mut values = self.read_all()?;
        if values.remove(key).is_none() {
            return Ok(false);
        }
        self.write_all(&values)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{FileStore, MemoryStore, OptionStore, StoreError};
    use std::fs;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn memory_add_keeps_existing_value() {
        let store = MemoryStore::with_values([("k", "first")]);
        assert_eq!(store.add("k", "second").unwrap(), Some("first".to_string()));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("first"));
        assert_eq!(store.add("other", "v").unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn add_fills_empty_value() {
        let memory = MemoryStore::with_values([("k", "")]);
        assert_eq!(memory.add("k", "filled").unwrap(), None);
        assert_eq!(memory.get("k").unwrap().as_deref(), Some("filled"));

        let dir = tempdir().expect("temp dir");
        let file = FileStore::open(dir.path().join("options.json"));
        file.set("k", "").unwrap();
        assert_eq!(file.add("k", "filled").unwrap(), None);
        assert_eq!(file.add("k", "again").unwrap().as_deref(), Some("filled"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("options.json");

        let store = FileStore::open(&path);
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("dismissed-dt-mobile-app", "1").unwrap();
        assert_eq!(store.add("my_jwt_key", "secret").unwrap(), None);

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get("my_jwt_key").unwrap().as_deref(), Some("secret"));
        assert_eq!(reopened.add("my_jwt_key", "other").unwrap().as_deref(), Some("secret"));
        assert!(reopened.delete("dismissed-dt-mobile-app").unwrap());
        assert!(!reopened.delete("dismissed-dt-mobile-app").unwrap());
    }

    #[test]
    fn file_store_creates_parent_dirs() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("options.json");
        FileStore::open(&path).set("k", "v").unwrap();
        assert!(path.exists());
        assert!(dir.path().join("nested").join("options.json.lock").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("options.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileStore::open(&path);
        assert!(matches!(store.get("k").unwrap_err(), StoreError::Corrupt(_)));
        assert!(matches!(store.add("k", "v").unwrap_err(), StoreError::Corrupt(_)));
        // the corrupt file is left untouched for the operator
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn adds_through_separate_handles_converge() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("options.json");
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let store = FileStore::open(path);
                    barrier.wait();
                    store.add("key", &format!("value-{i}")).unwrap()
                })
            })
            .collect();
        let written = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_none)
            .count();

        assert_eq!(written, 1);
        assert!(FileStore::open(&path).get("key").unwrap().unwrap().starts_with("value-"));
    }
}
