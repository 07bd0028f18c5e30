//! Incremental, de-duplicating movie feed.
//!
//! A [`MovieLoader`] is pointed at a [`FilterState`] and pulls pages from the
//! gateway one at a time. The lock around the feed is never held across the
//! gateway call; a generation counter detects parameter changes that happen
//! while a page is in flight.

use crate::filters::{FilterState, QueryCodec};
use crate::models::{Movie, MoviePage};
use crate::tmdb::TmdbApi;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Appended { page: u32, added: usize },
    /// Another page for the same parameters is still in flight.
    Busy,
    /// No further pages; the gateway was not called.
    Exhausted,
    /// Parameters changed while the page was in flight; the result was dropped.
    Discarded,
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedSnapshot {
    pub movies: Vec<Movie>,
    pub page: u32,
    pub total_pages: u32,
    pub total_results: u32,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<String>,
}

struct Feed {
    params: FilterState,
    generation: u64,
    movies: Vec<Movie>,
    seen: HashSet<i32>,
    page: u32,
    total_pages: u32,
    total_results: u32,
    has_more: bool,
    in_flight: bool,
    error: Option<String>,
}

impl Feed {
    fn new(params: FilterState, generation: u64) -> Self {
        Self {
            params,
            generation,
            movies: Vec::new(),
            seen: HashSet::new(),
            page: 0,
            total_pages: 0,
            total_results: 0,
            has_more: true,
            in_flight: false,
            error: None,
        }
    }

    /// Appends unseen movies in order and returns how many were new.
    fn merge(&mut self, results: Vec<Movie>) -> usize {
        let mut added = 0;
        for movie in results {
            if self.seen.insert(movie.id) {
                self.movies.push(movie);
                added += 1;
            }
        }
        added
    }
}

pub struct MovieLoader {
    tmdb: Arc<dyn TmdbApi>,
    codec: QueryCodec,
    feed: Mutex<Feed>,
}

impl MovieLoader {
    pub fn new(tmdb: Arc<dyn TmdbApi>, codec: QueryCodec) -> Self {
        let params = codec.default_state();
        Self {
            tmdb,
            codec,
            feed: Mutex::new(Feed::new(params, 0)),
        }
    }

    pub fn codec(&self) -> &QueryCodec {
        &self.codec
    }

    pub async fn params(&self) -> FilterState {
        self.feed.lock().await.params.clone()
    }

    /// Points the feed at `params`. Returns `true` when they differ from the
    /// active parameters, in which case the accumulated list is dropped and
    /// paging restarts at page 1.
    pub async fn navigate(&self, params: FilterState) -> bool {
        let mut feed = self.feed.lock().await;
        if feed.params == params {
            return false;
        }
        let generation = feed.generation + 1;
        info!(
            "Feed reset to '{}' (generation {})",
            self.codec.encode(&params),
            generation
        );
        *feed = Feed::new(params, generation);
        true
    }

    /// Whether the feed has nothing yet and may still load something.
    pub async fn needs_first_page(&self) -> bool {
        let feed = self.feed.lock().await;
        feed.page == 0 && feed.has_more && !feed.in_flight
    }

    pub async fn load_next(&self) -> LoadOutcome {
        let (params, generation, page) = {
            let mut feed = self.feed.lock().await;
            if feed.in_flight {
                debug!("Load ignored: page {} already in flight", feed.page + 1);
                return LoadOutcome::Busy;
            }
            if !feed.has_more {
                return LoadOutcome::Exhausted;
            }
            feed.in_flight = true;
            feed.error = None;
            (feed.params.clone(), feed.generation, feed.page + 1)
        };

        let result = self.fetch_page(&params, page).await;

        let mut feed = self.feed.lock().await;
        if feed.generation != generation {
            debug!(
                "Dropping page {} for superseded generation {}",
                page, generation
            );
            return LoadOutcome::Discarded;
        }
        feed.in_flight = false;

        match result {
            Ok(batch) => {
                let added = feed.merge(batch.results);
                feed.page = page;
                feed.total_pages = batch.total_pages;
                feed.total_results = batch.total_results;
                if batch.page >= batch.total_pages || added == 0 {
                    feed.has_more = false;
                }
                debug!(
                    "Page {}/{} added {} movies ({} total)",
                    page,
                    batch.total_pages,
                    added,
                    feed.movies.len()
                );
                LoadOutcome::Appended { page, added }
            }
            Err(e) => {
                warn!("Failed to load page {}: {:#}", page, e);
                feed.error = Some(format!("{:#}", e));
                LoadOutcome::Failed
            }
        }
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let feed = self.feed.lock().await;
        FeedSnapshot {
            movies: feed.movies.clone(),
            page: feed.page,
            total_pages: feed.total_pages,
            total_results: feed.total_results,
            has_more: feed.has_more,
            loading: feed.in_flight,
            error: feed.error.clone(),
        }
    }

    async fn fetch_page(&self, params: &FilterState, page: u32) -> Result<MoviePage> {
        let query = params.query.trim();
        if query.is_empty() {
            let filters = self.codec.discover_query(params);
            self.tmdb.discover_movies(&filters, page).await
        } else {
            self.tmdb.search_movies(query, page).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::DiscoverQuery;
    use crate::models::{Genre, MovieDetails};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn movie(id: i32) -> Movie {
        Movie {
            id,
            title: format!("Movie {id}"),
            poster_path: None,
            backdrop_path: None,
            release_date: "2001-01-01".to_string(),
            overview: String::new(),
            vote_average: 7.0,
            vote_count: 10,
            genre_ids: vec![28],
        }
    }

    fn page_of(page: u32, total_pages: u32, ids: impl IntoIterator<Item = i32>) -> MoviePage {
        let results: Vec<Movie> = ids.into_iter().map(movie).collect();
        MoviePage {
            page,
            total_results: total_pages * results.len() as u32,
            results,
            total_pages,
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Search(String, u32),
        Discover(DiscoverQuery, u32),
    }

    /// Replays scripted responses and records every call.
    #[derive(Default)]
    struct ScriptedTmdb {
        responses: StdMutex<VecDeque<Result<MoviePage>>>,
        calls: StdMutex<Vec<Call>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedTmdb {
        fn with(responses: Vec<Result<MoviePage>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn next(&self, call: Call) -> Result<MoviePage> {
            self.calls.lock().unwrap().push(call);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted response")))
        }
    }

    #[async_trait]
    impl TmdbApi for ScriptedTmdb {
        async fn search_movies(&self, query: &str, page: u32) -> Result<MoviePage> {
            self.next(Call::Search(query.to_string(), page)).await
        }
        async fn discover_movies(&self, filters: &DiscoverQuery, page: u32) -> Result<MoviePage> {
            self.next(Call::Discover(filters.clone(), page)).await
        }
        async fn fetch_movie(&self, _id: i32) -> Result<Option<MovieDetails>> {
            unreachable!()
        }
        async fn fetch_genres(&self) -> Result<Vec<Genre>> {
            unreachable!()
        }
    }

    fn codec() -> QueryCodec {
        QueryCodec::with_max_year(2025)
    }

    fn loader(tmdb: &Arc<ScriptedTmdb>) -> MovieLoader {
        MovieLoader::new(tmdb.clone(), codec())
    }

    #[tokio::test]
    async fn batman_pages_accumulate_to_one_hundred() {
        let responses = (1..=5)
            .map(|p| Ok(page_of(p, 5, (p as i32 - 1) * 20 + 1..=p as i32 * 20)))
            .collect();
        let tmdb = Arc::new(ScriptedTmdb::with(responses));
        let loader = loader(&tmdb);
        loader.navigate(codec().decode("q=batman")).await;

        assert_eq!(
            loader.load_next().await,
            LoadOutcome::Appended { page: 1, added: 20 }
        );
        assert!(loader.snapshot().await.has_more);
        for _ in 0..4 {
            loader.load_next().await;
        }

        let snap = loader.snapshot().await;
        assert_eq!(snap.movies.len(), 100);
        assert_eq!(snap.page, 5);
        assert!(!snap.has_more);
        let unique: HashSet<i32> = snap.movies.iter().map(|m| m.id).collect();
        assert_eq!(unique.len(), 100);
        assert_eq!(
            tmdb.calls(),
            (1..=5)
                .map(|p| Call::Search("batman".to_string(), p))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn overlapping_pages_keep_first_occurrence() {
        let tmdb = Arc::new(ScriptedTmdb::with(vec![
            Ok(page_of(1, 3, [1, 2, 3])),
            Ok(page_of(2, 3, [3, 4])),
        ]));
        let loader = loader(&tmdb);
        loader.load_next().await;
        assert_eq!(
            loader.load_next().await,
            LoadOutcome::Appended { page: 2, added: 1 }
        );

        let ids: Vec<i32> = loader.snapshot().await.movies.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(loader.snapshot().await.has_more);
    }

    #[tokio::test]
    async fn page_without_new_movies_ends_the_feed() {
        let tmdb = Arc::new(ScriptedTmdb::with(vec![
            Ok(page_of(1, 9, [1, 2])),
            Ok(page_of(2, 9, [1, 2])),
        ]));
        let loader = loader(&tmdb);
        loader.load_next().await;
        loader.load_next().await;
        assert!(!loader.snapshot().await.has_more);
    }

    #[tokio::test]
    async fn exhausted_feed_makes_no_gateway_call() {
        let tmdb = Arc::new(ScriptedTmdb::with(vec![Ok(page_of(1, 1, [7, 8]))]));
        let loader = loader(&tmdb);
        loader.load_next().await;
        let before = loader.snapshot().await;

        assert_eq!(loader.load_next().await, LoadOutcome::Exhausted);
        assert_eq!(tmdb.calls().len(), 1);
        assert_eq!(loader.snapshot().await, before);
    }

    #[tokio::test]
    async fn failure_keeps_page_counter_for_retry() {
        let tmdb = Arc::new(ScriptedTmdb::with(vec![
            Ok(page_of(1, 3, [1, 2])),
            Err(anyhow!("connection reset")),
            Ok(page_of(2, 3, [3])),
        ]));
        let loader = loader(&tmdb);
        loader.load_next().await;

        assert_eq!(loader.load_next().await, LoadOutcome::Failed);
        let snap = loader.snapshot().await;
        assert_eq!(snap.page, 1);
        assert_eq!(snap.movies.len(), 2);
        assert!(!snap.loading);
        assert!(snap.error.as_deref().unwrap().contains("connection reset"));

        assert_eq!(
            loader.load_next().await,
            LoadOutcome::Appended { page: 2, added: 1 }
        );
        assert_eq!(loader.snapshot().await.error, None);
        let pages: Vec<u32> = tmdb
            .calls()
            .into_iter()
            .map(|c| match c {
                Call::Discover(_, p) | Call::Search(_, p) => p,
            })
            .collect();
        assert_eq!(pages, vec![1, 2, 2]);
    }

    #[tokio::test]
    async fn empty_query_routes_to_discover_with_translated_filters() {
        let tmdb = Arc::new(ScriptedTmdb::with(vec![Ok(page_of(1, 1, [1]))]));
        let loader = loader(&tmdb);
        loader
            .navigate(codec().decode("q=%20%20&genres=28&fromYear=2020&toYear=2020"))
            .await;
        loader.load_next().await;

        match &tmdb.calls()[0] {
            Call::Discover(filters, 1) => {
                assert_eq!(filters.genres, vec![28]);
                assert_eq!(filters.from_year, Some(2020));
                assert_eq!(filters.to_year, Some(2020));
                assert_eq!(filters.min_rating, None);
            }
            other => panic!("expected discover call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn navigate_resets_only_on_change() {
        let tmdb = Arc::new(ScriptedTmdb::with(vec![
            Ok(page_of(1, 4, [1, 2])),
            Ok(page_of(1, 4, [9])),
        ]));
        let loader = loader(&tmdb);
        loader.load_next().await;

        assert!(!loader.navigate(codec().default_state()).await);
        assert_eq!(loader.snapshot().await.movies.len(), 2);

        assert!(loader.navigate(codec().decode("sort=popularity.asc")).await);
        let snap = loader.snapshot().await;
        assert!(snap.movies.is_empty());
        assert_eq!(snap.page, 0);
        assert!(loader.needs_first_page().await);

        loader.load_next().await;
        let ids: Vec<i32> = loader.snapshot().await.movies.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![9]);
    }

    #[tokio::test]
    async fn concurrent_load_is_ignored_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let tmdb = Arc::new(ScriptedTmdb {
            responses: StdMutex::new(vec![Ok(page_of(1, 3, [1, 2]))].into()),
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let loader = Arc::new(loader(&tmdb));

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_next().await }
        });
        while tmdb.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(loader.snapshot().await.loading);
        assert_eq!(loader.load_next().await, LoadOutcome::Busy);

        gate.notify_one();
        assert_eq!(
            first.await.unwrap(),
            LoadOutcome::Appended { page: 1, added: 2 }
        );
        assert_eq!(tmdb.calls().len(), 1);
    }

    #[tokio::test]
    async fn late_page_for_old_parameters_is_discarded() {
        let gate = Arc::new(Notify::new());
        let tmdb = Arc::new(ScriptedTmdb {
            responses: StdMutex::new(vec![Ok(page_of(1, 3, [1, 2]))].into()),
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let loader = Arc::new(loader(&tmdb));

        let stale = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_next().await }
        });
        while tmdb.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        loader.navigate(codec().decode("q=heat")).await;
        gate.notify_one();

        assert_eq!(stale.await.unwrap(), LoadOutcome::Discarded);
        let snap = loader.snapshot().await;
        assert!(snap.movies.is_empty());
        assert!(!snap.loading);
        assert_eq!(loader.params().await.query, "heat");
    }
}
