//! Durable storage for the session record.
//!
//! Every backend keeps exactly one record under a fixed key. Callers are
//! expected to treat any `load` error as "no persisted session".

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::Session;

/// Session file name in the cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service and account the session record is stored under
const KEYRING_SERVICE: &str = "consultdesk";
const KEYRING_KEY: &str = "session";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session record is malformed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Keychain accepted the session record but did not keep it")]
    NotPersisted,

    #[error("Session storage unavailable")]
    Unavailable,
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, StorageError>;

    /// Overwrite the stored record, or delete it when `session` is `None`
    fn save(&self, session: Option<&Session>) -> Result<(), StorageError>;
}

/// Which backend holds the persisted session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    File,
    Keyring,
}

impl std::str::FromStr for SessionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(SessionBackend::File),
            "keyring" | "keychain" => Ok(SessionBackend::Keyring),
            other => Err(format!("unknown session backend: {}", other)),
        }
    }
}

/// Open the store for `backend`. `cache_dir` is only used by the file backend.
pub fn open_store(backend: SessionBackend, cache_dir: PathBuf) -> Arc<dyn SessionStore> {
    match backend {
        SessionBackend::File => Arc::new(FileSessionStore::new(cache_dir)),
        SessionBackend::Keyring => Arc::new(KeyringSessionStore::new()),
    }
}

/// JSON record in the cache directory.
pub struct FileSessionStore {
    cache_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>, StorageError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let session = serde_json::from_str(&contents)?;
        debug!(?path, "Session record read");
        Ok(Some(session))
    }

    fn save(&self, session: Option<&Session>) -> Result<(), StorageError> {
        let path = self.session_path();
        match session {
            Some(session) => {
                std::fs::create_dir_all(&self.cache_dir)?;
                let contents = serde_json::to_string_pretty(session)?;
                std::fs::write(path, contents)?;
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }
}

/// JSON record in the OS keychain.
pub struct KeyringSessionStore {
    service: String,
}

impl KeyringSessionStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, KEYRING_KEY)?)
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for KeyringSessionStore {
    fn load(&self) -> Result<Option<Session>, StorageError> {
        match self.entry()?.get_password() {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: Option<&Session>) -> Result<(), StorageError> {
        let entry = self.entry()?;
        match session {
            Some(session) => {
                let record = serde_json::to_string(session)?;
                entry.set_password(&record)?;
                // Read back through a fresh entry: a credential store that is
                // not backed by the OS keychain forgets the record here
                match self.entry()?.get_password() {
                    Ok(stored) if stored == record => {}
                    Ok(_) | Err(keyring::Error::NoEntry) => return Err(StorageError::NotPersisted),
                    Err(e) => return Err(e.into()),
                }
            }
            None => match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

/// Process-local store. Keeps the serialized record so decoding is exercised
/// the same way as the durable backends.
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a raw record, which need not be valid JSON
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            record: Mutex::new(Some(raw.into())),
        }
    }

    pub fn with_session(session: &Session) -> Result<Self, StorageError> {
        Ok(Self::with_raw(serde_json::to_string(session)?))
    }

    /// Raw stored record, if any
    pub fn raw(&self) -> Option<String> {
        self.record.lock().ok().and_then(|record| record.clone())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>, StorageError> {
        let record = self.record.lock().map_err(|_| StorageError::Unavailable)?;
        match record.as_deref() {
            Some(contents) => Ok(Some(serde_json::from_str(contents)?)),
            None => Ok(None),
        }
    }

    fn save(&self, session: Option<&Session>) -> Result<(), StorageError> {
        let serialized = session.map(serde_json::to_string).transpose()?;
        let mut record = self.record.lock().map_err(|_| StorageError::Unavailable)?;
        *record = serialized;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        Session {
            identifier: "a@b.com".to_string(),
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_file_store_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path().join("nested"));

        assert!(store.load().expect("empty load").is_none());

        store.save(Some(&sample_session())).expect("save");
        assert_eq!(store.load().expect("load"), Some(sample_session()));
    }

    #[test]
    fn test_file_store_delete_on_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path().to_path_buf());

        store.save(Some(&sample_session())).expect("save");
        store.save(None).expect("delete");
        assert!(!dir.path().join(SESSION_FILE).exists());

        // Deleting an absent record is fine
        store.save(None).expect("delete again");
    }

    #[test]
    fn test_file_store_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").expect("write");

        let store = FileSessionStore::new(dir.path().to_path_buf());
        assert!(matches!(store.load(), Err(StorageError::Serialize(_))));
    }

    #[test]
    fn test_file_store_rejects_partial_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(SESSION_FILE),
            r#"{"email":"a@b.com","idToken":"T1","expiresAt":1}"#,
        )
        .expect("write");

        let store = FileSessionStore::new(dir.path().to_path_buf());
        assert!(store.load().is_err());
    }

    #[test]
    fn test_keyring_store_keeps_record_between_entries() {
        let store = KeyringSessionStore::with_service("consultdesk-test");
        match store.save(Some(&sample_session())) {
            Ok(()) => {}
            // No keychain service on this machine (e.g. headless CI)
            Err(StorageError::Keyring(e)) => {
                eprintln!("skipping keychain round trip: {e}");
                return;
            }
            Err(e) => panic!("keychain did not store the session: {e}"),
        }

        assert_eq!(store.load().expect("load"), Some(sample_session()));
        store.save(None).expect("delete");
        assert!(store.load().expect("load after delete").is_none());
    }

    #[test]
    fn test_memory_store_keeps_serialized_record() {
        let store = MemorySessionStore::new();
        store.save(Some(&sample_session())).expect("save");

        let raw = store.raw().expect("record present");
        assert!(raw.contains("\"idToken\":\"T1\""));
        assert_eq!(store.load().expect("load"), Some(sample_session()));

        store.save(None).expect("delete");
        assert!(store.raw().is_none());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("file".parse::<SessionBackend>(), Ok(SessionBackend::File));
        assert_eq!(" Keyring ".parse::<SessionBackend>(), Ok(SessionBackend::Keyring));
        assert!("sqlite".parse::<SessionBackend>().is_err());
    }
}
