use crate::storage::{lock_store, SharedStore};
use anyhow::Result;

pub const HISTORY_KEY: &str = "searchKeys";

/// Previously submitted search terms, oldest first, without duplicates.
pub struct SearchHistory {
    store: SharedStore,
    keys: Vec<String>,
}

impl SearchHistory {
    pub fn load(store: SharedStore) -> Result<Self> {
        let keys = lock_store(&store).get(HISTORY_KEY)?.unwrap_or_default();
        Ok(Self { store, keys })
    }

    pub fn add(&mut self, term: &str) -> Result<()> {
        let term = term.trim();
        if term.is_empty() || self.keys.iter().any(|k| k == term) {
            return Ok(());
        }
        self.keys.push(term.to_string());
        if let Err(e) = self.persist() {
            self.keys.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn entries(&self) -> &[String] {
        &self.keys
    }

    pub fn clear(&mut self) -> Result<()> {
        let previous = std::mem::take(&mut self.keys);
        if let Err(e) = self.persist() {
            self.keys = previous;
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        lock_store(&self.store).set(HISTORY_KEY, &self.keys)
    }
}
