use crate::compose::FilterState;
use crate::config::Config;
use crate::history::SearchHistory;
use crate::models::{format_release_date, format_runtime, image_url, CastMember, CrewMember, Video};
use crate::paging::FetchOutcome;
use crate::query::Category;
use crate::scroll::ScrollTrigger;
use crate::session::{Session, ToggleError};
use crate::storage::LocalStore;
use crate::tmdb::{fetch_movie_bundle, CatalogApi, MovieBundle, TmdbClient};
use crate::watchlist::PersistentWatchlist;
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const TOP_CAST: usize = 6;
const MAX_TRAILERS: usize = 6;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
}

pub async fn run_server(config: Config) -> Result<()> {
    let catalog: Arc<dyn CatalogApi> = Arc::new(TmdbClient::new(&config.tmdb)?);
    let store = LocalStore::open(&config.data_path)?.shared();
    let watchlist = PersistentWatchlist::load(store.clone())?;
    let history = SearchHistory::load(store)?;
    let session = Arc::new(Session::new(
        catalog,
        Box::new(watchlist),
        history,
        ScrollTrigger::new(config.scroll_margin),
    ));

    let app = build_router(AppState {
        session: session.clone(),
    });

    info!("Listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    session.disconnect_sentinel();
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_movies))
        .route("/health", get(health))
        .route("/genres", get(list_genres))
        .route("/search", post(submit_search).delete(clear_search))
        .route(
            "/search/history",
            get(search_history).delete(clear_search_history),
        )
        .route("/filter", post(apply_filter))
        .route("/scroll", post(observe_sentinel))
        .route("/more", post(load_more))
        .route("/movie/:id", get(movie_detail))
        .route("/watchlist", get(watchlist).delete(clear_watchlist))
        .route("/watchlist/:id", delete(unwatch))
        .route("/watchlist/:id/toggle", post(toggle_watch))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

fn catalog_failure(err: anyhow::Error) -> Response {
    error!("Catalog request failed: {:#}", err);
    error_response(StatusCode::BAD_GATEWAY, format!("load failed: {err:#}"))
}

fn storage_failure(err: anyhow::Error) -> Response {
    error!("Storage write failed: {:#}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

#[derive(Deserialize)]
struct ListParams {
    category: Option<String>,
}

async fn list_movies(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let category = Category::from_param(params.category.as_deref());
    Json(state.session.open(category).await)
}

async fn list_genres(State(state): State<AppState>) -> Response {
    match state.session.genres().await {
        Ok(genres) => Json(json!({ "genres": genres })).into_response(),
        Err(e) => catalog_failure(e),
    }
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    query: String,
}

async fn submit_search(State(state): State<AppState>, Json(body): Json<SearchBody>) -> Response {
    match state.session.submit_search(&body.query).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn clear_search(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.clear_search().await)
}

async fn search_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "keys": state.session.search_history() }))
}

async fn clear_search_history(State(state): State<AppState>) -> Response {
    match state.session.clear_search_history() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn apply_filter(
    State(state): State<AppState>,
    Json(filter): Json<FilterState>,
) -> impl IntoResponse {
    Json(state.session.set_filter(filter))
}

/// Either the client's own visibility verdict, or the sentinel's top edge and
/// the viewport's bottom edge so the configured root margin decides.
#[derive(Deserialize)]
struct SentinelBody {
    visible: Option<bool>,
    sentinel_top: Option<f64>,
    viewport_bottom: Option<f64>,
}

async fn observe_sentinel(
    State(state): State<AppState>,
    Json(body): Json<SentinelBody>,
) -> Response {
    let (requested, view) = match (body.sentinel_top, body.viewport_bottom, body.visible) {
        (Some(top), Some(bottom), _) => state.session.sentinel_at(top, bottom).await,
        (_, _, Some(visible)) => state.session.sentinel(visible).await,
        _ => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "expected `visible` or `sentinel_top` with `viewport_bottom`".to_string(),
            )
        }
    };
    Json(json!({ "requested": requested, "view": view })).into_response()
}

async fn load_more(State(state): State<AppState>) -> impl IntoResponse {
    let (outcome, view) = state.session.load_more().await;
    let outcome = match outcome {
        FetchOutcome::Appended { .. } => "appended",
        FetchOutcome::Exhausted => "exhausted",
        FetchOutcome::AlreadyInFlight => "in_flight",
        FetchOutcome::Stale => "stale",
        FetchOutcome::Failed(_) => "failed",
    };
    Json(json!({ "outcome": outcome, "view": view }))
}

#[derive(Serialize)]
struct DetailView {
    #[serde(flatten)]
    detail: crate::models::MovieDetail,
    liked: bool,
    poster_url: Option<String>,
    backdrop_url: Option<String>,
    runtime_label: Option<String>,
    release_label: Option<String>,
    directors: Vec<CrewMember>,
    writers: Vec<CrewMember>,
    cast: Vec<CastMember>,
    trailers: Vec<TrailerView>,
    reviews: Vec<crate::models::Review>,
    review_total: u64,
}

#[derive(Serialize)]
struct TrailerView {
    name: String,
    embed_url: String,
}

impl From<&Video> for TrailerView {
    fn from(v: &Video) -> Self {
        Self {
            name: v.name.clone(),
            embed_url: v.embed_url(),
        }
    }
}

fn detail_view(bundle: MovieBundle, liked: bool) -> DetailView {
    let MovieBundle {
        detail,
        credits,
        videos,
        reviews,
    } = bundle;
    DetailView {
        liked,
        poster_url: image_url("w500", detail.poster_path.as_deref()),
        backdrop_url: image_url("original", detail.backdrop_path.as_deref()),
        runtime_label: detail.runtime.filter(|r| *r > 0).map(format_runtime),
        release_label: format_release_date(&detail.release_date),
        directors: credits.directors().into_iter().cloned().collect(),
        writers: credits.writers().into_iter().cloned().collect(),
        cast: credits.top_cast(TOP_CAST).into_iter().cloned().collect(),
        trailers: videos
            .youtube_trailers(MAX_TRAILERS)
            .into_iter()
            .map(TrailerView::from)
            .collect(),
        review_total: reviews.total_results,
        reviews: reviews.results,
        detail,
    }
}

async fn movie_detail(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let catalog = state.session.catalog();
    match fetch_movie_bundle(catalog.as_ref(), id).await {
        Ok(bundle) => {
            let liked = state.session.is_liked(id);
            Json(detail_view(bundle, liked)).into_response()
        }
        Err(e) => catalog_failure(e),
    }
}

async fn watchlist(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state.session.watchlist();
    Json(json!({ "count": entries.len(), "movies": entries }))
}

async fn toggle_watch(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.session.toggle_watch(id).await {
        Ok(liked) => Json(json!({ "id": id, "liked": liked })).into_response(),
        Err(ToggleError::Lookup(e)) => {
            warn!("Toggle failed for {}", id);
            catalog_failure(e)
        }
        Err(ToggleError::Storage(e)) => storage_failure(e),
    }
}

async fn unwatch(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.session.unwatch(id) {
        Ok(removed) => Json(json!({ "id": id, "removed": removed })).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn clear_watchlist(State(state): State<AppState>) -> Response {
    match state.session.clear_watchlist() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
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
