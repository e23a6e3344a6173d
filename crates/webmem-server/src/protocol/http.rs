//! HTTP control surface.
//!
//! A thin Axum router over [`webmem_core::Engine`]: each handler validates
//! its input, calls the engine, and maps the result to the wire shape in
//! [`super::types`]. No business logic lives here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use webmem_core::{Engine, WebMemError};

use super::types::*;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Configuration for the HTTP transport.
pub struct HttpTransportConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 3100 }
    }
}

/// Build the router. Split out from [`serve`] so tests can exercise routes
/// without binding a socket.
pub fn router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/pages", post(index_page))
        .route("/pages", get(list_pages))
        .route("/pages/probe", get(probe))
        .route("/pages/{id}", get(get_page))
        .route("/pages/{id}", delete(delete_page))
        .route("/search", get(search))
        .route("/visits", post(track_visit))
        .route("/stats", get(stats))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/top", get(cache_top))
        .route("/cache/clear", post(cache_clear))
        .route("/cache/cleanup", post(cache_cleanup))
        .route("/eviction/preview", get(eviction_preview))
        .route("/eviction/run", post(eviction_run))
        .route("/eviction/stats", get(eviction_stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve `router(engine)`, running until ctrl-c/SIGTERM.
pub async fn serve(config: HttpTransportConfig, engine: Arc<Engine>) -> std::io::Result<()> {
    let app = router(engine);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    info!("web-memory server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("web-memory server shutting down");
    Ok(())
}

/// Maps a core error to the small user-visible kind set of spec §7 and the
/// HTTP status a client should act on.
struct AppError(WebMemError);

impl From<WebMemError> for AppError {
    fn from(e: WebMemError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            WebMemError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorKind::Validation),
            WebMemError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Store),
            WebMemError::VectorDimensionMismatch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal)
            }
            WebMemError::EnrichmentUnavailable(_) => (StatusCode::OK, ErrorKind::Internal),
            WebMemError::CacheCorrupt(_) => (StatusCode::OK, ErrorKind::Internal),
            WebMemError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal),
            WebMemError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal),
            WebMemError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, ErrorKind::Internal),
            WebMemError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal),
        };
        warn!(error = %self.0, "request failed");
        (status, Json(ErrorResponse { error: ErrorBody { kind, message: self.0.to_string() } })).into_response()
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: ErrorBody { kind: ErrorKind::NotFound, message: message.to_string() },
        }),
    )
        .into_response()
}

fn validation(message: impl Into<String>) -> AppError {
    AppError(WebMemError::Validation(message.into()))
}

async fn index_page(
    State(state): State<AppState>,
    Json(req): Json<IndexPageRequest>,
) -> Result<Json<IndexPageResponse>, AppError> {
    if req.url.trim().is_empty() {
        return Err(validation("url must not be empty"));
    }
    let outcome = state.engine.ingest(req.url, req.title, req.content, req.favicon_url).await?;
    Ok(Json(outcome.into()))
}

async fn probe(
    State(state): State<AppState>,
    Query(q): Query<ProbeQuery>,
) -> Result<Json<ProbeResponse>, AppError> {
    if q.url.trim().is_empty() {
        return Err(validation("url must not be empty"));
    }
    let result = state.engine.probe(&q.url)?;
    Ok(Json(result.into()))
}

async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let hits = state.engine.search(&q.q).await?;
    let total_found = hits.len();
    Ok(Json(SearchResponse {
        results: hits.into_iter().map(Into::into).collect(),
        query: q.q,
        total_found,
    }))
}

async fn track_visit(
    State(state): State<AppState>,
    Json(req): Json<TrackVisitRequest>,
) -> Result<Json<TrackVisitResponse>, AppError> {
    if req.url.trim().is_empty() {
        return Err(validation("url must not be empty"));
    }
    let outcome = state.engine.track_visit(&req.url)?;
    Ok(Json(TrackVisitResponse {
        page_id: outcome.page.id,
        visit_count: outcome.page.visit_count,
        arc_score: outcome.page.arc_score,
    }))
}

async fn get_page(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.engine.get_page(id) {
        Ok(Some(page)) => Json(PageResponse::from(page)).into_response(),
        Ok(None) => not_found(&format!("no page with id {id}")),
        Err(e) => AppError(e).into_response(),
    }
}

async fn list_pages(
    State(state): State<AppState>,
    Query(q): Query<ListPagesQuery>,
) -> Result<Json<ListPagesResponse>, AppError> {
    let limit = q.limit.unwrap_or(20);
    let offset = q.offset.unwrap_or(0);
    let (pages, total) = state.engine.list_pages(limit, offset)?;
    Ok(Json(ListPagesResponse {
        pages: pages.into_iter().map(Into::into).collect(),
        total,
        limit,
        offset,
    }))
}

async fn delete_page(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.engine.delete_page(id) {
        Ok(true) => Json(DeletePageResponse { message: format!("page {id} deleted") }).into_response(),
        Ok(false) => not_found(&format!("no page with id {id}")),
        Err(e) => AppError(e).into_response(),
    }
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    Ok(Json(state.engine.stats()?.into()))
}

async fn cache_stats(State(state): State<AppState>) -> Result<Json<CacheStatsResponse>, AppError> {
    Ok(Json(state.engine.cache_stats()?.into()))
}

async fn cache_top(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<CacheTopResponse>, AppError> {
    let limit = q.limit.unwrap_or(10);
    let entries = state
        .engine
        .cache_top(limit)?
        .into_iter()
        .map(|(query, access_count)| CacheTopEntry { query, access_count })
        .collect();
    Ok(Json(CacheTopResponse { entries }))
}

async fn cache_clear(State(state): State<AppState>) -> Result<Json<CacheClearResponse>, AppError> {
    state.engine.cache_clear()?;
    Ok(Json(CacheClearResponse { message: "query embedding cache cleared".to_string() }))
}

async fn cache_cleanup(State(state): State<AppState>) -> Result<Json<CacheCleanupResponse>, AppError> {
    Ok(Json(CacheCleanupResponse { removed: state.engine.cache_cleanup()? }))
}

async fn eviction_preview(
    State(state): State<AppState>,
    Query(q): Query<CountQuery>,
) -> Result<Json<EvictionPreviewResponse>, AppError> {
    let count = q.count.unwrap_or(10);
    let candidates = state.engine.eviction_preview(count)?;
    Ok(Json(EvictionPreviewResponse { candidates: candidates.into_iter().map(Into::into).collect() }))
}

async fn eviction_run(State(state): State<AppState>) -> Result<Json<EvictionRunResponse>, AppError> {
    Ok(Json(state.engine.run_eviction()?.into()))
}

async fn eviction_stats(State(state): State<AppState>) -> Result<Json<EvictionStatsResponse>, AppError> {
    Ok(Json(state.engine.eviction_stats()?.into()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
