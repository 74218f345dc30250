use crate::models::MovieSummary;
use crate::storage::{lock_store, SharedStore};
use anyhow::Result;
use tracing::info;

pub const WATCHLIST_KEY: &str = "watchlist-storage";

/// The user's saved movies, unique by id, in insertion order.
///
/// Mutations are durable before they return.
pub trait WatchlistStore: Send + Sync {
    /// Returns false when the id was already present.
    fn add(&mut self, movie: &MovieSummary) -> Result<bool>;
    /// Returns false when the id was not present.
    fn remove(&mut self, id: i64) -> Result<bool>;
    fn contains(&self, id: i64) -> bool;
    fn clear(&mut self) -> Result<()>;
    fn count(&self) -> usize;
    fn entries(&self) -> Vec<MovieSummary>;

    /// Heart toggle. Returns the new liked state.
    fn toggle(&mut self, movie: &MovieSummary) -> Result<bool> {
        if self.contains(movie.id) {
            self.remove(movie.id)?;
            Ok(false)
        } else {
            self.add(movie)?;
            Ok(true)
        }
    }
}

pub struct PersistentWatchlist {
    store: SharedStore,
    entries: Vec<MovieSummary>,
}

impl PersistentWatchlist {
    pub fn load(store: SharedStore) -> Result<Self> {
        let entries: Vec<MovieSummary> = lock_store(&store)
            .get(WATCHLIST_KEY)?
            .unwrap_or_default();
        info!("Loaded watchlist with {} entries", entries.len());
        Ok(Self { store, entries })
    }

    fn persist(&self) -> Result<()> {
        lock_store(&self.store).set(WATCHLIST_KEY, &self.entries)
    }
}

impl WatchlistStore for PersistentWatchlist {
    fn add(&mut self, movie: &MovieSummary) -> Result<bool> {
        if self.contains(movie.id) {
            return Ok(false);
        }
        self.entries.push(movie.clone());
        if let Err(e) = self.persist() {
            self.entries.pop();
            return Err(e);
        }
        info!("Added '{}' ({}) to watchlist", movie.title, movie.id);
        Ok(true)
    }

    fn remove(&mut self, id: i64) -> Result<bool> {
        let Some(pos) = self.entries.iter().position(|m| m.id == id) else {
            return Ok(false);
        };
        let removed = self.entries.remove(pos);
        if let Err(e) = self.persist() {
            self.entries.insert(pos, removed);
            return Err(e);
        }
        info!("Removed '{}' ({}) from watchlist", removed.title, id);
        Ok(true)
    }

    fn contains(&self, id: i64) -> bool {
        self.entries.iter().any(|m| m.id == id)
    }

    fn clear(&mut self) -> Result<()> {
        let previous = std::mem::take(&mut self.entries);
        if let Err(e) = self.persist() {
            self.entries = previous;
            return Err(e);
        }
        info!("Cleared watchlist");
        Ok(())
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> Vec<MovieSummary> {
        self.entries.clone()
    }
}
