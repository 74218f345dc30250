use crate::compose::{compose, FilterState};
use crate::history::SearchHistory;
use crate::models::{Genre, MovieSummary};
use crate::paging::{Feed, FetchOutcome};
use crate::query::{Category, ModeSwitch, QueryKey};
use crate::scroll::{ScrollGate, ScrollTrigger};
use crate::tmdb::CatalogApi;
use crate::watchlist::WatchlistStore;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStatus {
    Loading,
    Error,
    Empty,
    Ready,
}

#[derive(Debug, Clone, Serialize)]
pub struct Card {
    #[serde(flatten)]
    pub movie: MovieSummary,
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    pub key: QueryKey,
    pub category: Category,
    pub title: String,
    pub search: String,
    pub status: ListStatus,
    pub error: Option<String>,
    pub cards: Vec<Card>,
    pub loaded: usize,
    pub total_results: u64,
    pub has_more: bool,
    pub fetching: bool,
    pub filter: FilterState,
}

/// Why a heart toggle failed: the movie could not be resolved, or the
/// watchlist could not be written.
#[derive(Debug)]
pub enum ToggleError {
    Lookup(anyhow::Error),
    Storage(anyhow::Error),
}

impl fmt::Display for ToggleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToggleError::Lookup(e) => write!(f, "lookup failed: {e:#}"),
            ToggleError::Storage(e) => write!(f, "watchlist write failed: {e:#}"),
        }
    }
}

impl std::error::Error for ToggleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ToggleError::Lookup(e) | ToggleError::Storage(e) => Some(e.as_ref()),
        }
    }
}

struct Controls {
    mode: ModeSwitch,
    filter: FilterState,
    trigger: ScrollTrigger,
}

/// One browsing session: the query being shown, its pages, the view filter,
/// the scroll sentinel and the user's saved state.
pub struct Session {
    catalog: Arc<dyn CatalogApi>,
    feed: Feed,
    controls: Mutex<Controls>,
    watchlist: Mutex<Box<dyn WatchlistStore>>,
    history: Mutex<SearchHistory>,
    genres: OnceCell<Vec<Genre>>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        watchlist: Box<dyn WatchlistStore>,
        history: SearchHistory,
        trigger: ScrollTrigger,
    ) -> Self {
        let mode = ModeSwitch::default();
        Self {
            feed: Feed::new(catalog.clone(), mode.current()),
            catalog,
            controls: Mutex::new(Controls {
                mode,
                filter: FilterState::default(),
                trigger,
            }),
            watchlist: Mutex::new(watchlist),
            history: Mutex::new(history),
            genres: OnceCell::new(),
        }
    }

    pub fn catalog(&self) -> Arc<dyn CatalogApi> {
        self.catalog.clone()
    }

    fn rekey(&self, controls: &mut Controls, key: Option<QueryKey>) {
        if let Some(key) = key {
            self.feed.reset(key);
            controls.trigger.rearm();
        }
    }

    /// Loads page 1 when the current key has nothing yet (also the retry path
    /// after a failed first page).
    async fn ensure_loaded(&self) {
        let snapshot = self.feed.snapshot();
        if snapshot.has_more.is_none() && !snapshot.fetching {
            self.feed.fetch_next().await;
        }
    }

    pub async fn open(&self, category: Category) -> ListingView {
        {
            let mut controls = lock(&self.controls);
            let key = controls.mode.select_category(category);
            self.rekey(&mut controls, key);
        }
        self.ensure_loaded().await;
        self.view()
    }

    pub async fn submit_search(&self, text: &str) -> Result<ListingView> {
        lock(&self.history).add(text)?;
        {
            let mut controls = lock(&self.controls);
            let key = controls.mode.submit(text);
            self.rekey(&mut controls, key);
        }
        self.ensure_loaded().await;
        Ok(self.view())
    }

    pub async fn clear_search(&self) -> ListingView {
        {
            let mut controls = lock(&self.controls);
            let key = controls.mode.clear();
            self.rekey(&mut controls, key);
        }
        self.ensure_loaded().await;
        self.view()
    }

    pub fn set_filter(&self, filter: FilterState) -> ListingView {
        debug!(genres = ?filter.genres, sort = %filter.sort, "Applying filter");
        lock(&self.controls).filter = filter;
        self.view()
    }

    pub async fn load_more(&self) -> (FetchOutcome, ListingView) {
        let outcome = self.feed.fetch_next().await;
        (outcome, self.view())
    }

    /// Sentinel observation from the client. Fetches when the sentinel has just
    /// come into view and the list can grow.
    pub async fn sentinel(&self, visible: bool) -> (bool, ListingView) {
        let fire = {
            let mut controls = lock(&self.controls);
            let snapshot = self.feed.snapshot();
            let shown = snapshot
                .items
                .iter()
                .filter(|m| controls.filter.admits(m))
                .count();
            let gate = ScrollGate {
                has_next: snapshot.has_more == Some(true),
                fetching: snapshot.fetching,
                len: shown,
            };
            controls.trigger.observe(visible, gate)
        };
        if fire {
            info!("Sentinel visible, requesting next page");
            self.feed.fetch_next().await;
        }
        (fire, self.view())
    }

    /// Same as [`Session::sentinel`], with visibility decided by the trigger's
    /// root margin from the sentinel and viewport positions.
    pub async fn sentinel_at(
        &self,
        sentinel_top: f64,
        viewport_bottom: f64,
    ) -> (bool, ListingView) {
        let visible = lock(&self.controls)
            .trigger
            .sentinel_visible(sentinel_top, viewport_bottom);
        self.sentinel(visible).await
    }

    pub fn disconnect_sentinel(&self) {
        lock(&self.controls).trigger.disconnect();
    }

    pub async fn genres(&self) -> Result<Vec<Genre>> {
        let genres = self
            .genres
            .get_or_try_init(|| async {
                let genres = self.catalog.genres().await?;
                info!("Loaded {} genres", genres.len());
                Ok::<_, anyhow::Error>(genres)
            })
            .await?;
        Ok(genres.clone())
    }

    pub fn is_liked(&self, id: i64) -> bool {
        lock(&self.watchlist).contains(id)
    }

    /// Looks the movie up in the loaded list, then the watchlist, then the
    /// catalog, and flips its watchlist membership.
    pub async fn toggle_watch(&self, id: i64) -> Result<bool, ToggleError> {
        let known = self.feed.find(id).or_else(|| {
            lock(&self.watchlist)
                .entries()
                .into_iter()
                .find(|m| m.id == id)
        });
        let movie = match known {
            Some(m) => m,
            None => self
                .catalog
                .movie_detail(id)
                .await
                .map_err(|e| {
                    ToggleError::Lookup(anyhow!("Movie {} not found: {:#}", id, e))
                })?
                .to_summary(),
        };
        lock(&self.watchlist)
            .toggle(&movie)
            .map_err(ToggleError::Storage)
    }

    pub fn unwatch(&self, id: i64) -> Result<bool> {
        lock(&self.watchlist).remove(id)
    }

    pub fn watchlist(&self) -> Vec<MovieSummary> {
        lock(&self.watchlist).entries()
    }

    pub fn clear_watchlist(&self) -> Result<()> {
        lock(&self.watchlist).clear()
    }

    pub fn search_history(&self) -> Vec<String> {
        lock(&self.history).entries().to_vec()
    }

    pub fn clear_search_history(&self) -> Result<()> {
        lock(&self.history).clear()
    }

    pub fn view(&self) -> ListingView {
        let (category, filter) = {
            let controls = lock(&self.controls);
            (controls.mode.category(), controls.filter.clone())
        };
        let snapshot = self.feed.snapshot();
        let composed = compose(&snapshot.items, &filter);
        let cards: Vec<Card> = {
            let watchlist = lock(&self.watchlist);
            composed
                .into_iter()
                .map(|movie| Card {
                    liked: watchlist.contains(movie.id),
                    movie,
                })
                .collect()
        };

        let status = if snapshot.items.is_empty() {
            if snapshot.error.is_some() {
                ListStatus::Error
            } else if snapshot.fetching || snapshot.has_more.is_none() {
                ListStatus::Loading
            } else {
                ListStatus::Empty
            }
        } else if cards.is_empty() {
            ListStatus::Empty
        } else {
            ListStatus::Ready
        };

        let title = match &snapshot.key {
            QueryKey::Browse(c) => c.title().to_string(),
            QueryKey::Search(q) => format!("搜尋：{q}"),
        };

        ListingView {
            search: snapshot.key.search_text().to_string(),
            key: snapshot.key,
            category,
            title,
            status,
            error: snapshot.error,
            loaded: snapshot.items.len(),
            cards,
            total_results: snapshot.total_results,
            has_more: snapshot.has_more == Some(true),
            fetching: snapshot.fetching,
            filter,
        }
    }
}
