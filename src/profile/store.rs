//! Profile persistence
//!
//! Profiles live in a flat namespace keyed by sanitized name. The store
//! depends on a small blob-storage capability so the persistence
//! mechanism can be swapped: [`DirStorage`] keeps one `.json` file per
//! profile, [`MemStorage`] backs tests.

use crate::profile::{display_name, sanitize_name, Profile, ProfileError};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

/// Keyed blob-storage capability
pub trait Storage: Send {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    /// `Ok(None)` when the key does not exist
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn keys(&self) -> io::Result<Vec<String>>;
    /// Removing a missing key is a no-op
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One `.json` file per key under a root directory
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default profiles directory: `<data_dir>/hearfit/profiles`
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hearfit")
            .join("profiles")
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl Storage for DirStorage {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.path_for(key), bytes)
    }

    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_json = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if is_json {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory storage for tests
#[derive(Debug, Default)]
pub struct MemStorage {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let mut blobs = self.blobs.lock().map_err(lock_error)?;
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(lock_error)?;
        Ok(blobs.get(key).cloned())
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let blobs = self.blobs.lock().map_err(lock_error)?;
        Ok(blobs.keys().cloned().collect())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut blobs = self.blobs.lock().map_err(lock_error)?;
        blobs.remove(key);
        Ok(())
    }
}

fn lock_error<T>(_: std::sync::PoisonError<T>) -> io::Error {
    io::Error::other("storage lock poisoned")
}

/// Named profile persistence over a [`Storage`] backend
#[derive(Debug)]
pub struct ProfileStore<S: Storage = DirStorage> {
    storage: S,
}

impl ProfileStore<DirStorage> {
    /// Store under the default profiles directory
    pub fn open_default() -> Self {
        Self::new(DirStorage::new(DirStorage::default_root()))
    }
}

impl<S: Storage> ProfileStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Write or overwrite the record under `name`'s sanitized key
    pub fn save(&self, name: &str, profile: &Profile) -> Result<(), ProfileError> {
        let key = key_for(name)?;
        let json = serde_json::to_vec_pretty(profile)?;
        self.storage.put(&key, &json)?;
        tracing::info!(name = name.trim(), key, "Profile saved");
        Ok(())
    }

    /// Load the full record, failing with `NotFound` if absent
    pub fn load(&self, name: &str) -> Result<Profile, ProfileError> {
        let key = key_for(name)?;
        let bytes = self
            .storage
            .get(&key)?
            .ok_or_else(|| ProfileError::NotFound(name.trim().to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All known display names, sorted case-insensitively
    pub fn list(&self) -> Result<Vec<String>, ProfileError> {
        let mut names: Vec<String> = self
            .storage
            .keys()?
            .iter()
            .map(|key| display_name(key))
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        Ok(names)
    }

    /// Remove the record if present; missing records are a no-op
    pub fn delete(&self, name: &str) -> Result<(), ProfileError> {
        let key = key_for(name)?;
        self.storage.remove(&key)?;
        tracing::info!(name = name.trim(), key, "Profile deleted");
        Ok(())
    }
}

fn key_for(name: &str) -> Result<String, ProfileError> {
    let key = sanitize_name(name);
    if key.is_empty() {
        return Err(ProfileError::InvalidName);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eq::EqGainSet;

    fn store() -> ProfileStore<MemStorage> {
        ProfileStore::new(MemStorage::new())
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = store();
        let profile = Profile::manual(EqGainSet {
            gain_global: 1.2,
            low_db: 1.0,
            mid_db: 2.0,
            high_db: 3.0,
        });
        store.save("Test A", &profile).unwrap();
        let loaded = store.load("Test A").unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let err = store().load("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_name_rejected_before_io() {
        let store = store();
        let profile = Profile::manual(EqGainSet::flat());
        assert!(matches!(
            store.save("   ", &profile),
            Err(ProfileError::InvalidName)
        ));
        assert!(matches!(store.load(""), Err(ProfileError::InvalidName)));
        // nothing was written
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_sorted_case_insensitively() {
        let store = store();
        let profile = Profile::manual(EqGainSet::flat());
        store.save("bravo", &profile).unwrap();
        store.save("Alpha", &profile).unwrap();
        store.save("charlie", &profile).unwrap();
        assert_eq!(store.list().unwrap(), vec!["Alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_delete_then_load_fails() {
        let store = store();
        store.save("gone", &Profile::manual(EqGainSet::flat())).unwrap();
        store.delete("gone").unwrap();
        assert!(store.load("gone").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        store().delete("never existed").unwrap();
    }

    #[test]
    fn test_colliding_names_share_a_record() {
        // "Test A" and "Test  A" sanitize to the same key; last write
        // wins and either display name loads the record
        let store = store();
        let first = Profile::manual(EqGainSet::flat());
        let second = Profile::manual(EqGainSet {
            gain_global: 2.0,
            low_db: 0.0,
            mid_db: 0.0,
            high_db: 0.0,
        });
        store.save("Test A", &first).unwrap();
        store.save("Test  A", &second).unwrap();
        assert_eq!(store.load("Test A").unwrap(), second);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
