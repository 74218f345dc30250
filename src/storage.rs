use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Durable key/value document: every key holds one JSON value, the whole map
/// lives in a single file. Loaded once, written through on every change.
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    entries: Map<String, Value>,
}

pub type SharedStore = Arc<Mutex<LocalStore>>;

pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, LocalStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Corrupt store file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store at {}, starting empty", path.display());
                Map::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Not backed by a file; nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Map::new(),
        }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.entries
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .with_context(|| format!("Stored value under '{}' has the wrong shape", key))
    }

    /// On a failed write the in-memory value is restored, so a later flush of
    /// another key cannot persist it.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).context("Failed to serialize stored value")?;
        let previous = self.entries.insert(key.to_string(), value);
        if let Err(e) = self.flush() {
            self.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        let Some(previous) = self.entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.flush() {
            self.restore(key, Some(previous));
            return Err(e);
        }
        Ok(())
    }

    fn restore(&mut self, key: &str, previous: Option<Value>) {
        match previous {
            Some(value) => self.entries.insert(key.to_string(), value),
            None => self.entries.remove(key),
        };
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!("Flushed store to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("store.json");
        let mut store = LocalStore::open(&path).expect("open");
        store.set("searchKeys", &vec!["dune", "alien"]).expect("set");

        let reopened = LocalStore::open(&path).expect("reopen");
        let keys: Vec<String> = reopened.get("searchKeys").expect("get").expect("present");
        assert_eq!(keys, vec!["dune".to_string(), "alien".to_string()]);
        assert!(reopened.get::<Vec<String>>("missing").expect("get").is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").expect("write");
        assert!(LocalStore::open(&path).is_err());
    }

    #[test]
    fn failed_write_is_not_flushed_later() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("data");
        let path = blocker.join("store.json");
        let mut store = LocalStore::open(&path).expect("open");

        fs::write(&blocker, "not a directory").expect("block");
        assert!(store.set("watchlist-storage", &vec![9]).is_err());
        assert!(store.get::<Vec<i64>>("watchlist-storage").expect("get").is_none());

        fs::remove_file(&blocker).expect("unblock");
        store.set("searchKeys", &vec!["dune"]).expect("set");
        let reopened = LocalStore::open(&path).expect("reopen");
        assert!(reopened.get::<Vec<i64>>("watchlist-storage").expect("get").is_none());
        assert!(reopened.get::<Vec<String>>("searchKeys").expect("get").is_some());
    }

    #[test]
    fn failed_remove_keeps_the_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("data");
        let mut store = LocalStore::open(blocker.join("store.json")).expect("open");
        store.set("a", &1).expect("set");

        fs::remove_dir_all(&blocker).expect("drop dir");
        fs::write(&blocker, "not a directory").expect("block");
        assert!(store.remove("a").is_err());
        assert_eq!(store.get::<i32>("a").expect("get"), Some(1));
    }

    #[test]
    fn remove_forgets_key() {
        let mut store = LocalStore::in_memory();
        store.set("a", &1).expect("set");
        store.remove("a").expect("remove");
        assert!(store.get::<i32>("a").expect("get").is_none());
    }
}
