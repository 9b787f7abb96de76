//! Visitor identity resolution.
//!
//! A visitor id lives in client-local storage (a browser cookie for HTTP
//! visitors, a JSON file for the CLI). Components that need it receive an
//! [`IdentityProvider`] instead of touching storage directly.

use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::util::lock::mutex_lock;
use crate::domain::visitor::VisitorId;

/// Fixed storage key under which the visitor id is persisted.
pub const VISITOR_STORAGE_KEY: &str = "visitorId";

const SOURCE: &str = "pageviews::identity";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("client storage is unavailable: {0}")]
    Unavailable(String),
    #[error("client storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("client storage is corrupt: {0}")]
    Corrupt(String),
}

/// Client-local string storage, modeled on a browser's `localStorage`.
pub trait VisitorStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Resolves the identifier of the visitor behind the current request.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self) -> Option<VisitorId>;
}

/// Provider for contexts without client storage. Never yields an id.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIdentity;

impl IdentityProvider for NoIdentity {
    fn resolve(&self) -> Option<VisitorId> {
        None
    }
}

/// Get-or-create provider over a [`VisitorStorage`].
#[derive(Debug)]
pub struct StoredIdentity<S> {
    storage: S,
}

impl<S: VisitorStorage> StoredIdentity<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}

impl<S: VisitorStorage> IdentityProvider for StoredIdentity<S> {
    fn resolve(&self) -> Option<VisitorId> {
        let stored = match self.storage.get_item(VISITOR_STORAGE_KEY) {
            Ok(value) => value,
            Err(err) => {
                warn!(target: SOURCE, error = %err, "Visitor storage unreadable");
                return None;
            }
        };

        if let Some(raw) = stored {
            match VisitorId::parse(&raw) {
                Ok(id) => return Some(id),
                Err(err) => {
                    debug!(target: SOURCE, error = %err, "Replacing malformed visitor id");
                }
            }
        }

        let id = VisitorId::generate();
        if let Err(err) = self.storage.set_item(VISITOR_STORAGE_KEY, id.as_str()) {
            warn!(
                target: SOURCE,
                error = %err,
                "Failed to persist visitor id; it will not survive this request"
            );
        }
        Some(id)
    }
}

/// Storage held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VisitorStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(mutex_lock(&self.items, SOURCE, "memory.get_item")
            .get(key)
            .cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        mutex_lock(&self.items, SOURCE, "memory.set_item")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Storage persisted as a flat JSON object in a file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| StorageError::Corrupt(format!("{}: {err}", self.path.display()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

impl VisitorStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.load() {
            Ok(mut items) => Ok(items.remove(key)),
            Err(StorageError::Corrupt(detail)) => {
                warn!(target: SOURCE, detail = %detail, "Ignoring corrupt visitor storage");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // A corrupt file is replaced rather than blocking identity forever.
        let mut items = self.load().unwrap_or_default();
        items.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec_pretty(&items)
            .map_err(|err| StorageError::Corrupt(err.to_string()))?;
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStorage;

    impl VisitorStorage for BrokenStorage {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("no window".to_string()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("no window".to_string()))
        }
    }

    struct ReadOnlyStorage;

    impl VisitorStorage for ReadOnlyStorage {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".to_string()))
        }
    }

    #[test]
    fn same_storage_resolves_same_id() {
        let provider = StoredIdentity::new(MemoryStorage::new());
        let first = provider.resolve().expect("id");
        let second = provider.resolve().expect("id");
        assert_eq!(first, second);
        assert_eq!(
            provider
                .storage()
                .get_item(VISITOR_STORAGE_KEY)
                .expect("read")
                .as_deref(),
            Some(first.as_str())
        );
    }

    #[test]
    fn fresh_storages_resolve_different_ids() {
        let a = StoredIdentity::new(MemoryStorage::new()).resolve().expect("id");
        let b = StoredIdentity::new(MemoryStorage::new()).resolve().expect("id");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_value_is_replaced() {
        let storage = MemoryStorage::new();
        storage
            .set_item(VISITOR_STORAGE_KEY, "not a visitor id")
            .expect("write");
        let provider = StoredIdentity::new(storage);
        let id = provider.resolve().expect("id");
        assert_eq!(provider.resolve(), Some(id));
    }

    #[test]
    fn no_identity_never_resolves() {
        assert_eq!(NoIdentity.resolve(), None);
    }

    #[test]
    fn unreadable_storage_yields_none() {
        assert_eq!(StoredIdentity::new(BrokenStorage).resolve(), None);
    }

    #[test]
    fn unwritable_storage_still_yields_an_id() {
        assert!(StoredIdentity::new(ReadOnlyStorage).resolve().is_some());
    }

    #[test]
    fn file_storage_persists_across_providers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("visitor.json");

        let first = StoredIdentity::new(FileStorage::new(&path))
            .resolve()
            .expect("id");
        let second = StoredIdentity::new(FileStorage::new(&path))
            .resolve()
            .expect("id");

        assert_eq!(first, second);
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_rewritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("visitor.json");
        fs::write(&path, b"{not json").expect("write");

        let provider = StoredIdentity::new(FileStorage::new(&path));
        let id = provider.resolve().expect("id");
        assert_eq!(provider.resolve(), Some(id));

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains(VISITOR_STORAGE_KEY));
    }
}
