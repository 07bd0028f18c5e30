use crate::config::Config;
use crate::debounce::Debouncer;
use crate::favorites::{FavoritesStore, FileStore};
use crate::filters::{FilterDraft, FilterState, QueryCodec, SortOption, MAX_RATING, MIN_RATING};
use crate::loader::{FeedSnapshot, LoadOutcome, MovieLoader};
use crate::models::{image_url, Movie};
use crate::tmdb::{self, CachedGenres, TmdbApi, TmdbClient};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub tmdb: Arc<dyn TmdbApi>,
    pub genres: Arc<CachedGenres>,
    pub loader: Arc<MovieLoader>,
    pub favorites: Arc<Mutex<FavoritesStore>>,
    pub search: Debouncer<String>,
}

impl AppState {
    /// Must be called inside a tokio runtime; the search debouncer task is
    /// spawned here.
    pub fn new(
        tmdb: Arc<dyn TmdbApi>,
        favorites: FavoritesStore,
        codec: QueryCodec,
        search_settle: Duration,
    ) -> Self {
        let loader = Arc::new(MovieLoader::new(tmdb.clone(), codec));
        let search = {
            let loader = loader.clone();
            Debouncer::spawn(search_settle, move |text: String| {
                let loader = loader.clone();
                async move { settle_search(&loader, text).await }
            })
        };
        Self {
            tmdb,
            genres: Arc::new(CachedGenres::new()),
            loader,
            favorites: Arc::new(Mutex::new(favorites)),
            search,
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::new(
        config.tmdb_api_key.clone(),
        config.tmdb_base_url.clone(),
    )?);
    info!("Using TMDB at {}", config.tmdb_base_url);

    let storage = Arc::new(FileStore::new(config.favorites_dir.clone()));
    info!("Favorites stored in {}", config.favorites_dir.display());

    let state = AppState::new(
        tmdb,
        FavoritesStore::new(storage),
        QueryCodec::current(),
        config.search_settle,
    );
    let app = build_router(state);

    info!("Listening on {}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/genres", get(list_genres))
        .route("/discover", get(discover))
        .route("/discover/options", get(discover_options))
        .route("/discover/more", post(load_more))
        .route("/discover/apply", post(apply_filters))
        .route("/discover/clear", post(clear_filters))
        .route("/discover/search", post(search_input))
        .route("/movies/:id", get(movie_detail))
        .route("/movies/:id/favorite", post(toggle_favorite))
        .route("/favorites", get(list_favorites).post(add_favorite))
        .route(
            "/favorites/:id",
            get(favorite_status).delete(remove_favorite),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn settle_search(loader: &MovieLoader, text: String) {
    let current = loader.params().await;
    let next = loader.codec().with_query(&current, &text);
    if loader.navigate(next).await {
        debug!("Search settled on '{}'", text);
        loader.load_next().await;
    }
}

#[derive(Debug, Serialize)]
struct DiscoverView {
    location: String,
    filters: FilterState,
    filtered: bool,
    feed: FeedSnapshot,
}

async fn discover_view(state: &AppState, outcome: Option<LoadOutcome>) -> Response {
    let codec = state.loader.codec();
    let filters = state.loader.params().await;
    let view = DiscoverView {
        location: codec.href("/discover", &filters),
        filtered: codec.is_filtered(&filters),
        filters,
        feed: state.loader.snapshot().await,
    };
    let status = match outcome {
        Some(LoadOutcome::Failed) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    (status, Json(view)).into_response()
}

/// Loads page 1 when the feed is empty, e.g. right after navigating.
async fn ensure_first_page(state: &AppState) -> Option<LoadOutcome> {
    if state.loader.needs_first_page().await {
        Some(state.loader.load_next().await)
    } else {
        None
    }
}

async fn navigate_to(state: &AppState, next: FilterState) -> Response {
    state.loader.navigate(next).await;
    let outcome = ensure_first_page(state).await;
    discover_view(state, outcome).await
}

async fn discover(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Response {
    let next = state.loader.codec().decode(raw.as_deref().unwrap_or(""));
    navigate_to(&state, next).await
}

async fn load_more(State(state): State<AppState>) -> Response {
    let outcome = state.loader.load_next().await;
    debug!("Load more -> {:?}", outcome);
    discover_view(&state, Some(outcome)).await
}

async fn apply_filters(
    State(state): State<AppState>,
    Json(draft): Json<FilterDraft>,
) -> Response {
    let current = state.loader.params().await;
    let next = state.loader.codec().apply(&current, draft);
    navigate_to(&state, next).await
}

async fn clear_filters(State(state): State<AppState>) -> Response {
    let current = state.loader.params().await;
    let next = state.loader.codec().clear_filters(&current);
    navigate_to(&state, next).await
}

#[derive(Debug, Deserialize)]
struct SearchInput {
    text: String,
}

async fn search_input(
    State(state): State<AppState>,
    Json(input): Json<SearchInput>,
) -> impl IntoResponse {
    state.search.push(input.text.clone());
    (StatusCode::ACCEPTED, Json(json!({ "pending": input.text })))
}

async fn discover_options(State(state): State<AppState>) -> impl IntoResponse {
    let codec = state.loader.codec();
    let sorts = SortOption::ALL
        .iter()
        .map(|s| json!({ "value": s.as_str(), "label": s.label() }))
        .collect::<Vec<_>>();
    Json(json!({
        "sorts": sorts,
        "year_range": [codec.min_year, codec.max_year],
        "rating_range": [MIN_RATING, MAX_RATING],
    }))
}

async fn list_genres(State(state): State<AppState>) -> Response {
    match state.genres.get(state.tmdb.as_ref()).await {
        Ok(genres) => Json(genres.to_vec()).into_response(),
        Err(e) => gateway_error("Failed to load genres", e),
    }
}

async fn movie_detail(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let Some(id) = tmdb::parse_tmdb_id(&raw_id) else {
        return movie_not_found(&raw_id);
    };
    match state.tmdb.fetch_movie(id).await {
        Ok(Some(movie)) => {
            let favorite = match with_favorites(&state, move |f| Ok(f.contains(id))).await {
                Ok(favorite) => favorite,
                Err(e) => return storage_error(e),
            };
            let runtime = movie.runtime_label();
            let poster = image_url(movie.poster_path.as_deref(), "w500");
            let backdrop = image_url(movie.backdrop_path.as_deref(), "original");
            Json(json!({
                "movie": movie,
                "runtime": runtime,
                "poster": poster,
                "backdrop": backdrop,
                "favorite": favorite,
            }))
            .into_response()
        }
        Ok(None) => movie_not_found(&raw_id),
        Err(e) => gateway_error("Failed to load movie", e),
    }
}

/// Runs `f` on the blocking pool, since the store does file I/O.
async fn with_favorites<T, F>(state: &AppState, f: F) -> Result<T>
where
    F: FnOnce(&mut FavoritesStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let favorites = state.favorites.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = favorites.blocking_lock();
        f(&mut *guard)
    })
    .await
        .context("Favorites task failed")?
}

async fn toggle_favorite(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let Some(id) = tmdb::parse_tmdb_id(&raw_id) else {
        return movie_not_found(&raw_id);
    };
    let removed = with_favorites(&state, move |f| {
        if f.contains(id) {
            f.remove(id)
        } else {
            Ok(false)
        }
    })
    .await;
    match removed {
        Ok(true) => return Json(json!({ "id": id, "favorite": false })).into_response(),
        Ok(false) => {}
        Err(e) => return storage_error(e),
    }
    let details = match state.tmdb.fetch_movie(id).await {
        Ok(Some(details)) => details,
        Ok(None) => return movie_not_found(&raw_id),
        Err(e) => return gateway_error("Failed to load movie", e),
    };
    let summary = details.summary();
    match with_favorites(&state, move |f| f.add(summary)).await {
        Ok(_) => Json(json!({ "id": id, "favorite": true })).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn list_favorites(State(state): State<AppState>) -> Response {
    match with_favorites(&state, |f| Ok(f.list()?.to_vec())).await {
        Ok(movies) => Json(movies).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn add_favorite(State(state): State<AppState>, Json(movie): Json<Movie>) -> Response {
    let record = movie.clone();
    match with_favorites(&state, move |f| f.add(record)).await {
        Ok(true) => (StatusCode::CREATED, Json(movie)).into_response(),
        Ok(false) => (StatusCode::OK, Json(movie)).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn favorite_status(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let Some(id) = tmdb::parse_tmdb_id(&raw_id) else {
        return movie_not_found(&raw_id);
    };
    match with_favorites(&state, move |f| Ok(f.contains(id))).await {
        Ok(favorite) => Json(json!({ "id": id, "favorite": favorite })).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn remove_favorite(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let Some(id) = tmdb::parse_tmdb_id(&raw_id) else {
        return movie_not_found(&raw_id);
    };
    match with_favorites(&state, move |f| f.remove(id)).await {
        Ok(removed) => Json(json!({ "id": id, "removed": removed })).into_response(),
        Err(e) => storage_error(e),
    }
}

fn movie_not_found(raw_id: &str) -> Response {
    debug!("Movie '{}' not found", raw_id);
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Movie not found" })),
    )
        .into_response()
}

fn gateway_error(context: &str, e: anyhow::Error) -> Response {
    warn!("{}: {:#}", context, e);
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": format!("{}: {}", context, e) })),
    )
        .into_response()
}

fn storage_error(e: anyhow::Error) -> Response {
    error!("Favorites storage failed: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Favorites storage unavailable" })),
    )
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
