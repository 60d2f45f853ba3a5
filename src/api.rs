// src/api.rs
//! JSON serving + admin surface. All reads go through the cache; the
//! store is only touched on the request path as the id-lookup fallback.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::cache::{CacheStats, NewsCache, RecordPatch};
use crate::model::{CallAttempt, Category, NewsRecord, SymbolInfo, TriggerSource};
use crate::pipeline::Pipeline;
use crate::schedule::{BatchOutcome, JobRow, Scheduler};
use crate::store::Store;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub cache: Arc<NewsCache>,
    pub scheduler: Arc<Scheduler>,
    pub pipeline: Arc<Pipeline>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/news", get(news_by_category))
        .route("/api/news/{id}", get(news_by_id))
        .route("/api/latest", get(latest))
        .route("/api/featured", get(featured))
        .route("/api/search", get(search))
        .route("/api/symbols", get(symbols))
        .route("/api/symbols/{symbol}/news", get(symbol_news))
        .route("/api/stats", get(stats))
        .route("/admin/news/{id}/flags", post(admin_news_flags))
        .route("/admin/news/{id}/delete", post(admin_news_delete))
        .route("/admin/jobs", get(admin_jobs))
        .route("/admin/jobs/{name}/toggle", post(admin_toggle_job))
        .route("/admin/jobs/{name}/retime", post(admin_retime_job))
        .route("/admin/jobs/{name}/run", post(admin_run_job))
        .route("/admin/jobs/run-all", post(admin_run_all))
        .route("/admin/scheduler/pause", post(admin_pause))
        .route("/admin/scheduler/resume", post(admin_resume))
        .route("/admin/cache/reload", post(admin_cache_reload))
        .route("/admin/attempts", get(admin_attempts))
        .route("/admin/symbols/{symbol}/fetch", post(admin_fetch_symbol))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

// ---- public reads -------------------------------------------------------

#[derive(serde::Deserialize)]
struct NewsQuery {
    category: String,
    subcategory: Option<String>,
    limit: Option<usize>,
}

async fn news_by_category(
    State(state): State<AppState>,
    Query(q): Query<NewsQuery>,
) -> Result<Json<Vec<NewsRecord>>, (StatusCode, String)> {
    let Some(category) = Category::parse(&q.category) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("unknown category: {}", q.category),
        ));
    };
    let records = state.cache.by_category(
        category,
        q.subcategory.as_deref(),
        clamp_limit(q.limit, DEFAULT_LIMIT),
    );
    Ok(Json(records))
}

/// Cache first; on a miss fall back to the store and re-warm the cache.
/// Unpublished drafts are invisible on either path.
async fn news_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NewsRecord>, StatusCode> {
    if let Some(rec) = state.cache.by_id(id) {
        return Ok(Json(rec));
    }
    match state.store.record_by_id(id).await {
        Ok(Some(rec)) if rec.is_published => {
            state.cache.insert(rec.clone());
            Ok(Json(rec))
        }
        Ok(_) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(target: "api", id, error = %e, "record lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(serde::Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn latest(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<NewsRecord>> {
    Json(state.cache.latest(clamp_limit(q.limit, DEFAULT_LIMIT)))
}

async fn featured(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<NewsRecord>> {
    Json(state.cache.featured(clamp_limit(q.limit, 10)))
}

#[derive(serde::Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Json<Vec<NewsRecord>> {
    Json(state.cache.search(&q.q, clamp_limit(q.limit, 50)))
}

#[derive(serde::Deserialize)]
struct SymbolsQuery {
    sector: Option<String>,
    q: Option<String>,
}

async fn symbols(
    State(state): State<AppState>,
    Query(q): Query<SymbolsQuery>,
) -> Json<Vec<SymbolInfo>> {
    if let Some(query) = q.q.as_deref() {
        return Json(state.cache.search_symbols(query, DEFAULT_LIMIT));
    }
    match q.sector.as_deref() {
        Some(sector) => Json(state.cache.symbols_for_sector(sector)),
        None => Json(state.cache.all_symbols()),
    }
}

async fn symbol_news(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<NewsRecord>> {
    Json(
        state
            .cache
            .symbol_news(&symbol, clamp_limit(q.limit, DEFAULT_LIMIT)),
    )
}

async fn stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

// ---- admin surface ------------------------------------------------------

#[derive(serde::Deserialize)]
struct FlagsReq {
    is_published: Option<bool>,
    is_featured: Option<bool>,
}

/// Publish/unpublish or feature a record, then keep the cache in step:
/// unpublishing evicts, publishing re-warms, a feature flip patches the
/// cached copy in place.
async fn admin_news_flags(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<FlagsReq>,
) -> Result<Json<OkResp>, (StatusCode, String)> {
    if body.is_published.is_none() && body.is_featured.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            "provide is_published or is_featured".to_string(),
        ));
    }
    let found = state
        .store
        .update_record_flags(id, body.is_published, body.is_featured)
        .await
        .map_err(internal)?;
    if !found {
        return Err((StatusCode::NOT_FOUND, format!("record not found: {id}")));
    }

    if body.is_published == Some(false) {
        state.cache.remove(id);
    } else if state.cache.by_id(id).is_some() {
        state.cache.apply_update(
            id,
            RecordPatch {
                is_featured: body.is_featured,
                ..RecordPatch::default()
            },
        );
    } else if body.is_published == Some(true) {
        if let Some(rec) = state.store.record_by_id(id).await.map_err(internal)? {
            state.cache.insert(rec);
        }
    }
    Ok(Json(OkResp { ok: true }))
}

async fn admin_news_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OkResp>, (StatusCode, String)> {
    let found = state.store.delete_record(id).await.map_err(internal)?;
    if !found {
        return Err((StatusCode::NOT_FOUND, format!("record not found: {id}")));
    }
    state.cache.remove(id);
    Ok(Json(OkResp { ok: true }))
}

async fn admin_jobs(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobRow>>, (StatusCode, String)> {
    state
        .scheduler
        .job_rows()
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(serde::Deserialize)]
struct ToggleReq {
    enabled: bool,
}

#[derive(serde::Serialize)]
struct OkResp {
    ok: bool,
}

async fn admin_toggle_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ToggleReq>,
) -> Result<Json<OkResp>, (StatusCode, String)> {
    let found = state
        .scheduler
        .set_enabled(&name, body.enabled)
        .await
        .map_err(internal)?;
    if !found {
        return Err((StatusCode::NOT_FOUND, format!("job not found: {name}")));
    }
    Ok(Json(OkResp { ok: true }))
}

#[derive(serde::Deserialize)]
struct RetimeReq {
    cron_time: Option<String>,
    interval_minutes: Option<u32>,
}

async fn admin_retime_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RetimeReq>,
) -> Result<Json<OkResp>, (StatusCode, String)> {
    if body.cron_time.is_none() && body.interval_minutes.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            "provide cron_time or interval_minutes".to_string(),
        ));
    }
    if let Some(at) = body.cron_time.as_deref() {
        if crate::model::parse_cron_time(at).is_none() {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("invalid cron time: {at}"),
            ));
        }
    }
    let found = state
        .scheduler
        .retime(&name, body.cron_time.as_deref(), body.interval_minutes)
        .await
        .map_err(internal)?;
    if !found {
        return Err((StatusCode::NOT_FOUND, format!("job not found: {name}")));
    }
    Ok(Json(OkResp { ok: true }))
}

#[derive(serde::Serialize)]
struct RunResp {
    success: bool,
    record_count: usize,
    error: Option<String>,
}

async fn admin_run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<RunResp> {
    let outcome = state.scheduler.run_job_now(&name, "admin").await;
    Json(RunResp {
        success: outcome.success,
        record_count: outcome.record_count,
        error: outcome.error,
    })
}

async fn admin_run_all(State(state): State<AppState>) -> Json<BatchOutcome> {
    let outcome = state
        .scheduler
        .run_all_now(TriggerSource::Manual("admin".to_string()))
        .await;
    Json(outcome)
}

async fn admin_pause(State(state): State<AppState>) -> Json<OkResp> {
    state.scheduler.pause_all();
    Json(OkResp { ok: true })
}

async fn admin_resume(State(state): State<AppState>) -> Json<OkResp> {
    state.scheduler.resume_all();
    Json(OkResp { ok: true })
}

#[derive(serde::Serialize)]
struct ReloadResp {
    loaded: usize,
}

async fn admin_cache_reload(
    State(state): State<AppState>,
) -> Result<Json<ReloadResp>, (StatusCode, String)> {
    let loaded = state
        .cache
        .load_from_store(&state.store)
        .await
        .map_err(internal)?;
    match state.store.active_symbols().await {
        Ok(symbols) => state.cache.load_symbols(symbols),
        Err(e) => tracing::warn!(target: "api", error = %e, "symbol reload failed"),
    }
    Ok(Json(ReloadResp { loaded }))
}

async fn admin_attempts(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<CallAttempt>>, (StatusCode, String)> {
    state
        .store
        .recent_attempts(clamp_limit(q.limit, 50) as i64)
        .await
        .map(Json)
        .map_err(internal)
}

async fn admin_fetch_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Json<RunResp> {
    let outcome = state.pipeline.fetch_symbol_news(&symbol, "admin").await;
    Json(RunResp {
        success: outcome.success,
        record_count: outcome.record_count,
        error: outcome.error,
    })
}

fn internal(e: sqlx::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
