//! FinSights — Binary Entrypoint
//! Boot order: env + tracing, store + migrations, idempotent seeds,
//! cache warm, scheduler, HTTP server. The cache is fully rebuilt from
//! the store before the scheduler starts.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use finsights::api::{create_router, AppState};
use finsights::cache::NewsCache;
use finsights::config::AppConfig;
use finsights::metrics::Metrics;
use finsights::pipeline::Pipeline;
use finsights::provider::GeminiClient;
use finsights::schedule::{Scheduler, SchedulerCfg};
use finsights::store::Store;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("finsights=info,ingest=info,schedule=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env();
    tracing::info!(bind = %cfg.bind_addr, db = %cfg.database_url, "starting finsights");

    // sqlite creates the file but not its parent directory.
    if let Some(dir) = cfg
        .database_url
        .strip_prefix("sqlite://")
        .map(std::path::Path::new)
        .and_then(|p| p.parent())
        .filter(|d| !d.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let store = Arc::new(
        Store::connect(&cfg.database_url)
            .await
            .context("store connect + migrate")?,
    );

    // Idempotent seeds, keyed by natural key, never overwriting.
    let seeded_jobs = store.seed_jobs(finsights::config::default_jobs()).await?;
    let seeded_sources = store
        .seed_sources(finsights::config::fallback_source_domains())
        .await?;
    let seeded_symbols = store
        .seed_symbols(finsights::config::default_symbols())
        .await?;
    tracing::info!(seeded_jobs, seeded_sources, seeded_symbols, "seed pass done");

    let cache = Arc::new(NewsCache::new(cfg.symbol_ttl_minutes));
    let loaded = cache.load_from_store(&store).await?;
    cache.load_symbols(store.active_symbols().await?);
    tracing::info!(loaded, "cache warmed from store");

    let client = Arc::new(GeminiClient::from_config(&cfg));
    if !client.is_configured() {
        tracing::warn!("GEMINI_API_KEY not set; scheduled fetches will log failed attempts");
    }
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        client,
    ));

    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&pipeline),
        SchedulerCfg {
            poll_secs: cfg.poll_secs,
            worker_slots: cfg.worker_slots,
            tz: cfg.utc_offset,
        },
    );
    let scheduler_handle = scheduler.spawn();

    let metrics = Metrics::init(cfg.symbol_ttl_minutes);
    let state = AppState {
        store,
        cache,
        scheduler: Arc::clone(&scheduler),
        pipeline,
    };
    let app = create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "serving");

    let shutdown_scheduler = Arc::clone(&scheduler);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining in-flight runs");
            shutdown_scheduler.shutdown().await;
        })
        .await
        .context("http server")?;

    scheduler_handle.abort();
    Ok(())
}
