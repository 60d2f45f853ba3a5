// tests/api_http.rs
//
// HTTP-level tests for the JSON router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value as Json;
use tempfile::TempDir;
use tower::ServiceExt as _; // for `oneshot`

use finsights::api::{create_router, AppState};
use finsights::cache::NewsCache;
use finsights::config::DEFAULT_UTC_OFFSET_SECS;
use finsights::error::ProviderError;
use finsights::model::{Category, NewsType};
use finsights::pipeline::Pipeline;
use finsights::provider::{ArticleFetch, ContentClient, Recency, SummaryFetch};
use finsights::schedule::{Scheduler, SchedulerCfg};
use finsights::store::{NewRecord, Store};

const BODY_LIMIT: usize = 1024 * 1024;

/// The router tests never reach the provider; every call fails loudly.
struct NoClient;

#[async_trait]
impl ContentClient for NoClient {
    async fn fetch_summary(
        &self,
        _query: &str,
        _recency: Recency,
        _domains: &[String],
    ) -> Result<SummaryFetch, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    async fn fetch_articles(
        &self,
        _query: &str,
        _recency: Recency,
        _domains: &[String],
        _max_articles: usize,
    ) -> Result<ArticleFetch, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

async fn test_app() -> (TempDir, Arc<Store>, Arc<NewsCache>, Router) {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}/test.db", dir.path().display());
    let store = Arc::new(Store::connect(&url).await.expect("store connect"));
    store.seed_jobs(finsights::config::default_jobs()).await.unwrap();

    let cache = Arc::new(NewsCache::new(30));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::new(NoClient),
    ));
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&pipeline),
        SchedulerCfg {
            poll_secs: 3600,
            worker_slots: 2,
            tz: chrono::FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap(),
        },
    );
    let state = AppState {
        store: Arc::clone(&store),
        cache: Arc::clone(&cache),
        scheduler,
        pipeline,
    };
    (dir, store, cache, create_router(state))
}

async fn seed_record(store: &Store, title: &str, published: bool) -> i64 {
    let rec = NewRecord {
        title: title.to_string(),
        summary: "a short summary".into(),
        content: None,
        category: Category::Market,
        subcategory: "morning".into(),
        news_type: NewsType::Summary,
        symbols: None,
        sentiment_score: 1,
        sentiment_explanation: String::new(),
        fetched_at: Utc::now(),
        is_published: published,
        is_featured: false,
        is_manual: false,
        citations: Vec::new(),
    };
    let mut tx = store.begin().await.unwrap();
    let id = store.insert_record(&mut tx, &rec).await.unwrap();
    tx.commit().await.unwrap();
    id
}

async fn json_body(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_returns_ok() {
    let (_dir, _store, _cache, app) = test_app().await;
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn news_rejects_unknown_category() {
    let (_dir, _store, _cache, app) = test_app().await;
    let resp = app
        .oneshot(
            Request::get("/api/news?category=crypto")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn news_by_id_falls_back_to_store_and_warms_cache() {
    let (_dir, store, cache, app) = test_app().await;
    let id = seed_record(&store, "Morning Market Update - 02 Jan 2026", true).await;
    assert!(cache.by_id(id).is_none());

    let resp = app
        .oneshot(
            Request::get(format!("/api/news/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["title"], "Morning Market Update - 02 Jan 2026");

    // The miss warmed the cache.
    assert!(cache.by_id(id).is_some());
}

#[tokio::test]
async fn news_by_id_missing_is_404() {
    let (_dir, _store, _cache, app) = test_app().await;
    let resp = app
        .oneshot(Request::get("/api/news/9999").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn news_by_id_never_serves_drafts() {
    let (_dir, store, cache, app) = test_app().await;
    let id = seed_record(&store, "Draft pending editorial review", false).await;

    let resp = app
        .oneshot(
            Request::get(format!("/api/news/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // The draft did not leak into the cache either.
    assert!(cache.by_id(id).is_none());
}

#[tokio::test]
async fn admin_flags_sync_store_and_cache() {
    let (_dir, store, cache, app) = test_app().await;
    let id = seed_record(&store, "RBI holds rates steady in June review", true).await;
    cache.load_from_store(&store).await.unwrap();

    // Featuring patches the cached copy in place.
    let resp = app
        .clone()
        .oneshot(
            Request::post(format!("/admin/news/{id}/flags"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"is_featured": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(cache.by_id(id).unwrap().is_featured);
    assert_eq!(cache.featured(10).len(), 1);

    // Unpublishing evicts it from the public surface.
    let resp = app
        .clone()
        .oneshot(
            Request::post(format!("/admin/news/{id}/flags"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"is_published": false}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(cache.by_id(id).is_none());
    let resp = app
        .clone()
        .oneshot(
            Request::get(format!("/api/news/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Re-publishing warms it back from the store.
    let resp = app
        .clone()
        .oneshot(
            Request::post(format!("/admin/news/{id}/flags"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"is_published": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(cache.by_id(id).is_some());

    // No flags at all is a bad request; an unknown id is not found.
    let resp = app
        .clone()
        .oneshot(
            Request::post(format!("/admin/news/{id}/flags"))
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = app
        .oneshot(
            Request::post("/admin/news/9999/flags")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"is_featured": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_delete_removes_record_everywhere() {
    let (_dir, store, cache, app) = test_app().await;
    let id = seed_record(&store, "Retracted: premature earnings story", true).await;
    cache.load_from_store(&store).await.unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::post(format!("/admin/news/{id}/delete"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(store.record_by_id(id).await.unwrap().is_none());
    assert!(cache.by_id(id).is_none());

    // Gone means gone; a repeat is a 404.
    let resp = app
        .oneshot(
            Request::post(format!("/admin/news/{id}/delete"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_and_stats_read_from_cache() {
    let (_dir, store, cache, app) = test_app().await;
    seed_record(&store, "Sensex opens flat amid global cues", true).await;
    cache.load_from_store(&store).await.unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::get("/api/search?q=sensex")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let hits = json_body(resp).await;
    assert_eq!(hits.as_array().unwrap().len(), 1);

    let resp = app
        .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let stats = json_body(resp).await;
    assert_eq!(stats["total_news"], 1);
    assert_eq!(stats["categories"]["market"], 1);
}

#[tokio::test]
async fn admin_jobs_lists_seeded_definitions() {
    let (_dir, _store, _cache, app) = test_app().await;
    let resp = app
        .oneshot(Request::get("/admin/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let jobs = json_body(resp).await;
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 14);
    // Enabled jobs carry an advisory next_run; none is running.
    let pre_market = jobs
        .iter()
        .find(|j| j["name"] == "market_pre_market")
        .unwrap();
    assert!(pre_market["next_run"].is_string());
    assert_eq!(pre_market["running"], false);
}

#[tokio::test]
async fn admin_toggle_and_retime_validate_input() {
    let (_dir, store, _cache, app) = test_app().await;

    let resp = app
        .clone()
        .oneshot(
            Request::post("/admin/jobs/market_pre_market/toggle")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"enabled": false}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let job = store.job_by_name("market_pre_market").await.unwrap().unwrap();
    assert!(!job.enabled);

    let resp = app
        .clone()
        .oneshot(
            Request::post("/admin/jobs/market_pre_market/retime")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"cron_time": "25:61"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(
            Request::post("/admin/jobs/no_such_job/toggle")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"enabled": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_run_now_reports_provider_failure_without_raising() {
    let (_dir, store, _cache, app) = test_app().await;

    let resp = app
        .oneshot(
            Request::post("/admin/jobs/market_pre_market/run")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("not configured"));

    // The failure is visible in the attempt log with the manual actor.
    let attempts = store.recent_attempts(10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].triggered_by, "manual:admin");
}

#[tokio::test]
async fn admin_cache_reload_rebuilds_from_store() {
    let (_dir, store, cache, app) = test_app().await;
    seed_record(&store, "Published after boot, not yet cached", true).await;
    assert!(cache.latest(10).is_empty());

    let resp = app
        .oneshot(
            Request::post("/admin/cache/reload")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["loaded"], 1);
    assert_eq!(cache.latest(10).len(), 1);
}
