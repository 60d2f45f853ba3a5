// tests/scheduler.rs
//
// Scheduler behavior short of the wall-clock loop: manual runs, the
// per-job overlap guard, batch aggregation, and pause bookkeeping. The
// pure trigger math has its own unit tests in src/schedule.rs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::FixedOffset;
use tempfile::TempDir;
use tokio::sync::Notify;

use finsights::cache::NewsCache;
use finsights::config::DEFAULT_UTC_OFFSET_SECS;
use finsights::error::ProviderError;
use finsights::model::TriggerSource;
use finsights::pipeline::Pipeline;
use finsights::provider::{
    ArticleFetch, ContentClient, ProviderArticle, Recency, SummaryFetch,
};
use finsights::schedule::{Scheduler, SchedulerCfg};
use finsights::store::Store;

/// Counts calls; summaries fail (so market jobs fail), article fetches
/// return one article each.
struct CountingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl ContentClient for CountingClient {
    async fn fetch_summary(
        &self,
        _query: &str,
        _recency: Recency,
        _domains: &[String],
    ) -> Result<SummaryFetch, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::BadStatus(500))
    }

    async fn fetch_articles(
        &self,
        query: &str,
        _recency: Recency,
        _domains: &[String],
        _max_articles: usize,
    ) -> Result<ArticleFetch, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ArticleFetch {
            articles: vec![ProviderArticle {
                // Unique titles so dedup never interferes.
                title: format!("Article {n} for query {query}"),
                summary: "s".into(),
                content: "c".into(),
                stocks_mentioned: vec![],
                sentiment_score: 1,
                sentiment_explanation: "e".into(),
            }],
            citations: vec![],
            latency_ms: 5,
        })
    }
}

/// Holds every provider call open until the gate is released.
struct StallingClient {
    gate: Arc<Notify>,
}

#[async_trait]
impl ContentClient for StallingClient {
    async fn fetch_summary(
        &self,
        _query: &str,
        _recency: Recency,
        _domains: &[String],
    ) -> Result<SummaryFetch, ProviderError> {
        self.gate.notified().await;
        Err(ProviderError::BadStatus(503))
    }

    async fn fetch_articles(
        &self,
        _query: &str,
        _recency: Recency,
        _domains: &[String],
        _max_articles: usize,
    ) -> Result<ArticleFetch, ProviderError> {
        self.gate.notified().await;
        Err(ProviderError::BadStatus(503))
    }
}

async fn scheduler_with(
    client: Arc<dyn ContentClient>,
    poll_secs: u64,
) -> (TempDir, Arc<Store>, Arc<Scheduler>) {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}/test.db", dir.path().display());
    let store = Arc::new(Store::connect(&url).await.expect("store connect"));
    store.seed_jobs(finsights::config::default_jobs()).await.unwrap();

    let cache = Arc::new(NewsCache::new(30));
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&store), cache, client));
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        pipeline,
        SchedulerCfg {
            poll_secs,
            worker_slots: 2,
            tz: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap(),
        },
    );
    (dir, store, scheduler)
}

async fn test_scheduler() -> (TempDir, Arc<Store>, Arc<Scheduler>) {
    let client = Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    });
    // 3600 s poll: the loop never ticks during a test.
    scheduler_with(client, 3600).await
}

#[tokio::test]
async fn run_job_now_executes_and_advances_last_run() {
    let (_dir, store, scheduler) = test_scheduler().await;

    let outcome = scheduler.run_job_now("sector_banking", "admin").await;
    assert!(outcome.success);
    assert_eq!(outcome.record_count, 1);

    let job = store.job_by_name("sector_banking").await.unwrap().unwrap();
    assert!(job.last_run.is_some());
}

#[tokio::test]
async fn run_job_now_unknown_job_reports_error() {
    let (_dir, _store, scheduler) = test_scheduler().await;
    let outcome = scheduler.run_job_now("no_such_job", "admin").await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn run_all_now_aggregates_success_and_failure() {
    let (_dir, _store, scheduler) = test_scheduler().await;

    let outcome = scheduler
        .run_all_now(TriggerSource::Manual("admin".into()))
        .await;
    // 5 market jobs fail (summary path), 9 news jobs each keep 1 article.
    assert_eq!(outcome.failed, 5);
    assert_eq!(outcome.success, 9);
    assert_eq!(outcome.total_records, 9);
}

#[tokio::test]
async fn failed_run_leaves_job_schedulable() {
    let (_dir, store, scheduler) = test_scheduler().await;

    // Market jobs fail with the counting client.
    let first = scheduler.run_job_now("market_pre_market", "admin").await;
    assert!(!first.success);

    // The job is back to Scheduled: a second manual run is accepted.
    let second = scheduler.run_job_now("market_pre_market", "admin").await;
    assert!(!second.success);
    assert_eq!(store.recent_attempts(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn pause_and_resume_toggle_flag_only() {
    let (_dir, store, scheduler) = test_scheduler().await;

    scheduler.pause_all();
    assert!(scheduler.is_paused());
    // Enabled flags are untouched by a global pause.
    assert_eq!(store.list_enabled_jobs().await.unwrap().len(), 14);

    scheduler.resume_all();
    assert!(!scheduler.is_paused());
}

#[tokio::test]
async fn toggle_and_retime_are_reflected_in_job_rows() {
    let (_dir, _store, scheduler) = test_scheduler().await;

    assert!(scheduler.set_enabled("macro_rbi", false).await.unwrap());
    assert!(scheduler
        .retime("sector_it", None, Some(45))
        .await
        .unwrap());

    let rows = scheduler.job_rows().await.unwrap();
    let rbi = rows.iter().find(|r| r.job.name == "macro_rbi").unwrap();
    assert!(!rbi.job.enabled);
    assert!(rbi.job.next_run.is_none());

    let it = rows.iter().find(|r| r.job.name == "sector_it").unwrap();
    assert_eq!(it.job.interval_minutes, Some(45));
    assert!(it.job.next_run.is_some());
}

#[tokio::test]
async fn concurrent_run_of_same_job_is_rejected() {
    let gate = Arc::new(Notify::new());
    let (_dir, store, scheduler) = scheduler_with(
        Arc::new(StallingClient {
            gate: Arc::clone(&gate),
        }),
        3600,
    )
    .await;

    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_job_now("market_pre_market", "admin").await })
    };
    // Wait for the first run to show as Running.
    loop {
        let rows = scheduler.job_rows().await.unwrap();
        if rows
            .iter()
            .any(|r| r.job.name == "market_pre_market" && r.running)
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let second = scheduler.run_job_now("market_pre_market", "admin").await;
    assert!(!second.success);
    assert_eq!(
        second.error.as_deref(),
        Some("job already running: market_pre_market")
    );

    gate.notify_one();
    let first = first.await.unwrap();
    assert!(!first.success); // the held call ends in a provider error

    // Only the completed run reached the attempt log.
    assert_eq!(store.recent_attempts(10).await.unwrap().len(), 1);

    // The guard cleared: a retry is accepted again.
    gate.notify_one();
    let retry = scheduler.run_job_now("market_pre_market", "admin").await;
    assert_ne!(
        retry.error.as_deref(),
        Some("job already running: market_pre_market")
    );
}

#[tokio::test]
async fn zero_poll_interval_is_clamped() {
    let client = Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    });
    let (_dir, _store, scheduler) = scheduler_with(client, 0).await;

    let handle = scheduler.spawn();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // A zero tick period would have panicked the loop task on its first poll.
    assert!(!handle.is_finished());

    scheduler.shutdown().await;
    handle.abort();
}

#[tokio::test]
async fn spawned_loop_shuts_down_cleanly() {
    let (_dir, _store, scheduler) = test_scheduler().await;
    let handle = scheduler.spawn();
    scheduler.shutdown().await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
}
