//! Durable home of the user list: a single JSON array of user records.

use netsim_abstract::{NetworkUser, SimConfig};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access user store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("user store {origin} does not hold a valid user list: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode user list: {0}")]
    Encode(#[source] serde_json::Error),
}

pub trait UserStorage {
    /// Returns `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<NetworkUser>>, StorageError>;

    /// Replaces the stored list with `users`.
    fn save(&mut self, users: &[NetworkUser]) -> Result<(), StorageError>;
}

impl<T: UserStorage + ?Sized> UserStorage for Box<T> {
    fn load(&self) -> Result<Option<Vec<NetworkUser>>, StorageError> {
        (**self).load()
    }

    fn save(&mut self, users: &[NetworkUser]) -> Result<(), StorageError> {
        (**self).save(users)
    }
}

/// Picks file-backed storage when the config names a path, memory otherwise.
pub fn storage_from_config(config: &SimConfig) -> Box<dyn UserStorage> {
    match &config.storage_path {
        Some(path) => Box::new(JsonFileStorage::new(path.clone())),
        None => Box::new(MemoryStorage::new()),
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl UserStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<Vec<NetworkUser>>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StorageError::Parse {
                origin: self.path.display().to_string(),
                source,
            })
    }

    fn save(&mut self, users: &[NetworkUser]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let data = serde_json::to_vec_pretty(users).map_err(StorageError::Encode)?;
        fs::write(&self.path, data).map_err(|err| self.io_error(err))
    }
}

/// Raw JSON text kept in memory, like a browser key-value slot. Clones share
/// the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-filled with arbitrary text, valid or not.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(raw.into()))),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl UserStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Vec<NetworkUser>>, StorageError> {
        match self.raw() {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StorageError::Parse {
                    origin: "memory".to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn save(&mut self, users: &[NetworkUser]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(users).map_err(StorageError::Encode)?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_abstract::{TrafficType, seed_users};
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_empty_slot() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("users.json"));
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn file_roundtrip_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let mut storage = JsonFileStorage::new(dir.path().join("state/nested/users.json"));
        let users = vec![
            NetworkUser::new("1", "Alice", TrafficType::VideoStream, 5.0),
            NetworkUser::new("3", "Charlie", TrafficType::VoipCall, 0.5),
        ];

        storage.save(&users).unwrap();
        assert_eq!(storage.load().unwrap(), Some(users));

        let on_disk = fs::read_to_string(storage.path()).unwrap();
        assert!(on_disk.contains("\"trafficType\": \"VoIP Call\""), "{on_disk}");
    }

    #[test]
    fn corrupted_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonFileStorage::new(&path).load().unwrap_err();
        assert!(matches!(err, StorageError::Parse { .. }), "{err}");
    }

    #[test]
    fn memory_clones_share_the_slot() {
        let storage = MemoryStorage::new();
        let mut writer = storage.clone();
        writer.save(&seed_users()).unwrap();
        assert_eq!(storage.load().unwrap(), Some(seed_users()));
        assert!(MemoryStorage::with_raw("[oops").load().is_err());
    }

    #[test]
    fn config_selects_backend() {
        let dir = tempdir().unwrap();
        let config = SimConfig {
            storage_path: Some(dir.path().join("users.json")),
            ..Default::default()
        };
        let mut storage = storage_from_config(&config);
        storage.save(&seed_users()).unwrap();
        assert!(dir.path().join("users.json").exists());
    }
}
