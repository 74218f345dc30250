//! Accumulates the pages of one query key into a flat list.
//!
//! [`Accumulator`] is the synchronous state machine; [`Feed`] drives it against
//! the catalog. A fetch is split into `begin_fetch` (claims the single in-flight
//! slot) and `apply` (lands the response), so the state lock is never held
//! across a network await and a response whose key was replaced meanwhile is
//! recognised as stale.

use crate::models::{MovieSummary, Page};
use crate::query::QueryKey;
use crate::tmdb::{fetch_page, CatalogApi};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    pub key: QueryKey,
    pub page: u32,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Begin {
    Fetch(PageTicket),
    InFlight,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Appended { page: u32, added: usize },
    Failed(String),
    Stale,
}

#[derive(Debug, Default)]
pub struct Accumulator {
    key: QueryKey,
    generation: u64,
    items: Vec<MovieSummary>,
    seen: HashSet<i64>,
    last_page: u32,
    more: Option<bool>,
    total_results: u64,
    in_flight: Option<u32>,
    error: Option<String>,
}

impl Accumulator {
    pub fn new(key: QueryKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn items(&self) -> &[MovieSummary] {
        &self.items
    }

    /// `None` until the first page of the current key has landed.
    pub fn has_more(&self) -> Option<bool> {
        self.more
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn reset(&mut self, key: QueryKey) {
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            key,
            generation,
            ..Default::default()
        };
    }

    pub fn begin_fetch(&mut self) -> Begin {
        if self.in_flight.is_some() {
            return Begin::InFlight;
        }
        if self.has_more() == Some(false) {
            return Begin::Exhausted;
        }
        let page = self.last_page + 1;
        self.in_flight = Some(page);
        self.error = None;
        Begin::Fetch(PageTicket {
            key: self.key.clone(),
            page,
            generation: self.generation,
        })
    }

    pub fn apply(&mut self, ticket: &PageTicket, result: Result<Page>) -> Applied {
        if ticket.generation != self.generation || self.in_flight != Some(ticket.page) {
            return Applied::Stale;
        }
        self.in_flight = None;
        match result {
            Ok(page) => {
                let more = page.has_next();
                let mut added = 0;
                for movie in page.results {
                    if self.seen.insert(movie.id) {
                        self.items.push(movie);
                        added += 1;
                    }
                }
                self.last_page = ticket.page;
                self.more = Some(more);
                self.total_results = page.total_results;
                Applied::Appended {
                    page: ticket.page,
                    added,
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.error = Some(message.clone());
                Applied::Failed(message)
            }
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            key: self.key.clone(),
            items: self.items.clone(),
            has_more: self.has_more(),
            fetching: self.is_fetching(),
            error: self.error.clone(),
            total_results: self.total_results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub key: QueryKey,
    pub items: Vec<MovieSummary>,
    pub has_more: Option<bool>,
    pub fetching: bool,
    pub error: Option<String>,
    pub total_results: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Appended { page: u32, added: usize },
    Exhausted,
    AlreadyInFlight,
    Stale,
    Failed(String),
}

pub struct Feed {
    catalog: Arc<dyn CatalogApi>,
    state: Mutex<Accumulator>,
}

impl Feed {
    pub fn new(catalog: Arc<dyn CatalogApi>, key: QueryKey) -> Self {
        Self {
            catalog,
            state: Mutex::new(Accumulator::new(key)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Accumulator> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self, key: QueryKey) {
        info!("Switching list to {}", key);
        self.lock().reset(key);
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.lock().snapshot()
    }

    pub fn find(&self, id: i64) -> Option<MovieSummary> {
        self.lock().items().iter().find(|m| m.id == id).cloned()
    }

    /// Requests the next page unless one is already in flight or the stream is done.
    pub async fn fetch_next(&self) -> FetchOutcome {
        let begin = self.lock().begin_fetch();
        let ticket = match begin {
            Begin::Fetch(ticket) => ticket,
            Begin::InFlight => return FetchOutcome::AlreadyInFlight,
            Begin::Exhausted => return FetchOutcome::Exhausted,
        };
        debug!(key = %ticket.key, page = ticket.page, "Fetching page");
        let result = fetch_page(self.catalog.as_ref(), &ticket.key, ticket.page).await;
        let applied = self.lock().apply(&ticket, result);
        match applied {
            Applied::Appended { page, added } => {
                debug!(key = %ticket.key, page, added, "Page applied");
                FetchOutcome::Appended { page, added }
            }
            Applied::Failed(message) => {
                warn!("Failed to load page {} of {}: {}", ticket.page, ticket.key, message);
                FetchOutcome::Failed(message)
            }
            Applied::Stale => {
                debug!(key = %ticket.key, page = ticket.page, "Discarding stale page");
                FetchOutcome::Stale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credits, Genre, MovieDetail, Reviews, Videos};
    use crate::query::Category;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn movie(id: i64) -> MovieSummary {
        serde_json::from_value(serde_json::json!({ "id": id, "title": format!("movie {id}") }))
            .expect("movie")
    }

    fn make_page(page: u32, total_pages: u32, ids: &[i64]) -> Page {
        Page {
            page,
            total_pages,
            total_results: ids.len() as u64,
            results: ids.iter().copied().map(movie).collect(),
        }
    }

    fn popular() -> QueryKey {
        QueryKey::Browse(Category::Popular)
    }

    fn ticket(acc: &mut Accumulator) -> PageTicket {
        match acc.begin_fetch() {
            Begin::Fetch(t) => t,
            other => panic!("expected a ticket, got {:?}", other),
        }
    }

    #[test]
    fn appends_pages_in_order_until_exhausted() {
        let mut acc = Accumulator::new(popular());
        assert_eq!(acc.has_more(), None);

        let t1 = ticket(&mut acc);
        assert_eq!(t1.page, 1);
        acc.apply(&t1, Ok(make_page(1, 2, &[1, 2])));
        assert_eq!(acc.has_more(), Some(true));

        let t2 = ticket(&mut acc);
        assert_eq!(t2.page, 2);
        let applied = acc.apply(&t2, Ok(make_page(2, 2, &[2, 3])));
        assert_eq!(applied, Applied::Appended { page: 2, added: 1 });
        let ids: Vec<i64> = acc.items().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(acc.has_more(), Some(false));
        assert_eq!(acc.begin_fetch(), Begin::Exhausted);
    }

    #[test]
    fn second_begin_while_in_flight_is_refused() {
        let mut acc = Accumulator::new(popular());
        let _t1 = ticket(&mut acc);
        assert_eq!(acc.begin_fetch(), Begin::InFlight);
    }

    #[test]
    fn failure_keeps_list_and_allows_retry_of_same_page() {
        let mut acc = Accumulator::new(popular());
        let t1 = ticket(&mut acc);
        acc.apply(&t1, Ok(make_page(1, 3, &[1])));
        let t2 = ticket(&mut acc);
        let applied = acc.apply(&t2, Err(anyhow::anyhow!("TMDB API error: 500")));
        assert!(matches!(applied, Applied::Failed(_)));
        assert_eq!(acc.items().len(), 1);
        assert!(acc.error().is_some());

        let retry = ticket(&mut acc);
        assert_eq!(retry.page, 2);
        assert_eq!(acc.error(), None);
    }

    #[test]
    fn reset_makes_in_flight_response_stale() {
        let mut acc = Accumulator::new(popular());
        let t1 = ticket(&mut acc);
        acc.apply(&t1, Ok(make_page(1, 2, &[1])));
        let late = ticket(&mut acc);

        acc.reset(QueryKey::Search("dune".into()));
        assert!(acc.items().is_empty());
        assert!(!acc.is_fetching());

        assert_eq!(acc.apply(&late, Ok(make_page(2, 2, &[99]))), Applied::Stale);
        assert!(acc.items().is_empty());

        let fresh = ticket(&mut acc);
        assert_eq!(fresh.key, QueryKey::Search("dune".into()));
        assert_eq!(fresh.page, 1);
    }

    struct GatedCatalog {
        calls: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedCatalog {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogApi for GatedCatalog {
        async fn list_category(&self, _category: Category, page: u32) -> Result<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await?.forget();
            Ok(make_page(page, 3, &[page as i64 * 10, page as i64 * 10 + 1]))
        }
        async fn search(&self, _query: &str, page: u32) -> Result<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await?.forget();
            Ok(make_page(page, 1, &[7]))
        }
        async fn genres(&self) -> Result<Vec<Genre>> {
            Ok(Vec::new())
        }
        async fn movie_detail(&self, _id: i64) -> Result<MovieDetail> {
            anyhow::bail!("not used")
        }
        async fn credits(&self, _id: i64) -> Result<Credits> {
            anyhow::bail!("not used")
        }
        async fn videos(&self, _id: i64) -> Result<Videos> {
            anyhow::bail!("not used")
        }
        async fn reviews(&self, _id: i64, _page: u32) -> Result<Reviews> {
            anyhow::bail!("not used")
        }
    }

    async fn wait_for_calls(catalog: &GatedCatalog, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while catalog.calls() < expected {
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {} calls (got {})", expected, catalog.calls());
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn concurrent_fetches_collapse_to_one_request() {
        let catalog = Arc::new(GatedCatalog::new());
        let feed = Arc::new(Feed::new(catalog.clone(), popular()));

        catalog.gate.add_permits(1);
        assert_eq!(feed.fetch_next().await, FetchOutcome::Appended { page: 1, added: 2 });
        assert_eq!(catalog.calls(), 1);

        let first = tokio::spawn({
            let feed = feed.clone();
            async move { feed.fetch_next().await }
        });
        wait_for_calls(&catalog, 2).await;

        assert_eq!(feed.fetch_next().await, FetchOutcome::AlreadyInFlight);
        assert_eq!(catalog.calls(), 2);

        catalog.gate.add_permits(1);
        let outcome = first.await.expect("join");
        assert_eq!(outcome, FetchOutcome::Appended { page: 2, added: 2 });
        assert_eq!(catalog.calls(), 2);
        assert_eq!(feed.snapshot().items.len(), 4);
    }

    #[tokio::test]
    async fn late_browse_page_is_not_applied_to_search() {
        let catalog = Arc::new(GatedCatalog::new());
        let feed = Arc::new(Feed::new(catalog.clone(), popular()));
        catalog.gate.add_permits(1);
        feed.fetch_next().await;

        let late = tokio::spawn({
            let feed = feed.clone();
            async move { feed.fetch_next().await }
        });
        wait_for_calls(&catalog, 2).await;

        feed.reset(QueryKey::Search("dune".into()));
        assert!(feed.snapshot().items.is_empty());

        catalog.gate.add_permits(1);
        assert_eq!(late.await.expect("join"), FetchOutcome::Stale);
        assert!(feed.snapshot().items.is_empty());

        catalog.gate.add_permits(1);
        assert_eq!(feed.fetch_next().await, FetchOutcome::Appended { page: 1, added: 1 });
        let ids: Vec<i64> = feed.snapshot().items.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![7]);
        assert_eq!(feed.fetch_next().await, FetchOutcome::Exhausted);
    }
}
