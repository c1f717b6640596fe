//! Durable storage of BOSH session tokens, used by `restore()`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::jid::Jid;
use crate::Error;

/// The key BOSH session records are stored under.
pub const SESSION_KEY: &str = "xmpp-session-bosh";

/// What is needed to resume a BOSH session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The full JID the session was authenticated as.
    pub jid: String,
    /// The next rid to use.
    pub rid: u64,
    /// The session id.
    pub sid: String,
}

impl SessionRecord {
    /// Whether this record may be restored for `jid`.
    ///
    /// Without a JID any record matches. Otherwise the bare JIDs must be
    /// equal, or for a domain-only JID the cached JID's domain.
    pub fn matches(&self, jid: Option<&str>) -> bool {
        let Some(jid) = jid else {
            return true;
        };
        let (Ok(wanted), Ok(cached)) = (Jid::new(jid), Jid::new(&self.jid)) else {
            return false;
        };
        if wanted.to_bare() == cached.to_bare() {
            return true;
        }
        wanted.node().is_none() && wanted.domain() == cached.domain()
    }
}

/// A keyed string store, last writer wins.
pub trait SessionStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Result<Option<String>, Error>;
    /// Writes a value.
    fn set(&self, key: &str, value: &str) -> Result<(), Error>;
    /// Deletes a value, if present.
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// Decodes the record under [`SESSION_KEY`].
pub fn load(store: &dyn SessionStore) -> Result<Option<SessionRecord>, Error> {
    match store.get(SESSION_KEY)? {
        Some(value) => Ok(Some(serde_json::from_str(&value)?)),
        None => Ok(None),
    }
}

/// Encodes `record` under [`SESSION_KEY`].
pub fn save(store: &dyn SessionStore, record: &SessionRecord) -> Result<(), Error> {
    store.set(SESSION_KEY, &serde_json::to_string(record)?)
}

/// An in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// The store shared by the whole process.
    pub fn global() -> Arc<MemoryStore> {
        static GLOBAL: OnceLock<Arc<MemoryStore>> = OnceLock::new();
        GLOBAL.get_or_init(Default::default).clone()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// A store keeping one `<key>.json` file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Uses `dir`, which is created on first write.
    pub fn new<P: Into<PathBuf>>(dir: P) -> FileStore {
        FileStore { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
