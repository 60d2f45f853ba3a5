// src/pipeline.rs
//! One job execution end to end: resolve the allowlist, call the
//! provider, normalize and deduplicate, persist in one transaction,
//! push into the read cache, log the attempt. Every failure is caught
//! here and becomes a failed attempt row; nothing propagates to the
//! scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};

use crate::cache::NewsCache;
use crate::error::{IngestError, IngestResult};
use crate::model::{
    clamp_sentiment, AttemptStatus, Category, Citation, JobDefinition, NewsRecord, NewsType,
    TriggerSource,
};
use crate::provider::{
    clean_summary_text, render_structured_summary, ContentClient, ProviderArticle, ProviderReply,
    Recency,
};
use crate::store::{NewAttempt, NewRecord, Store};

/// Articles with shorter titles are dropped; market summaries get a
/// generated title instead.
const MIN_TITLE_LEN: usize = 10;
const MAX_TITLE_LEN: usize = 500;
const MAX_ARTICLES: usize = 5;

/// What one execution produced; always returned, never an Err.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub record_count: usize,
    pub error: Option<String>,
}

impl RunOutcome {
    fn ok(record_count: usize) -> Self {
        Self {
            success: true,
            record_count,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            record_count: 0,
            error: Some(error),
        }
    }
}

pub struct Pipeline {
    store: Arc<Store>,
    cache: Arc<NewsCache>,
    client: Arc<dyn ContentClient>,
}

impl Pipeline {
    pub fn new(store: Arc<Store>, cache: Arc<NewsCache>, client: Arc<dyn ContentClient>) -> Self {
        Self {
            store,
            cache,
            client,
        }
    }

    /// Execute one job. Persistence happens-before the cache insertions,
    /// which happen-before the success attempt row.
    pub async fn execute(&self, job: &JobDefinition, triggered_by: &TriggerSource) -> RunOutcome {
        counter!("ingest_runs_total").increment(1);
        let started = Utc::now();

        let result = self.run_inner(job).await;
        match result {
            Ok((records, latency_ms)) => {
                let count = records.len();
                for rec in records {
                    self.cache.insert(rec);
                }
                counter!("ingest_records_total").increment(count as u64);
                histogram!("ingest_provider_ms").record(latency_ms as f64);

                self.log_attempt(
                    job,
                    triggered_by,
                    started,
                    AttemptStatus::Success,
                    Some(latency_ms),
                    Some(count as i64),
                    None,
                )
                .await;
                tracing::info!(
                    target: "ingest",
                    job = %job.name,
                    records = count,
                    latency_ms,
                    "job execution succeeded"
                );
                RunOutcome::ok(count)
            }
            Err(err) => {
                counter!("ingest_failures_total").increment(1);
                let message = err.to_string();
                self.log_attempt(
                    job,
                    triggered_by,
                    started,
                    AttemptStatus::Failed,
                    None,
                    None,
                    Some(message.clone()),
                )
                .await;
                tracing::warn!(
                    target: "ingest",
                    job = %job.name,
                    error = %message,
                    "job execution failed"
                );
                RunOutcome::failed(message)
            }
        }
    }

    async fn run_inner(&self, job: &JobDefinition) -> IngestResult<(Vec<NewsRecord>, i64)> {
        let domains = self.resolve_domains().await;

        if job.category == Category::Market {
            self.run_market_job(job, &domains).await
        } else {
            self.run_news_job(job, &domains).await
        }
    }

    /// Active persisted sources, else the built-in fallback. A store
    /// error here must not fail the run.
    async fn resolve_domains(&self) -> Vec<String> {
        match self.store.active_source_domains().await {
            Ok(domains) if !domains.is_empty() => domains,
            Ok(_) => crate::config::fallback_source_domains().to_vec(),
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, "source lookup failed, using fallback");
                crate::config::fallback_source_domains().to_vec()
            }
        }
    }

    /// Market jobs synthesize exactly one summary record.
    async fn run_market_job(
        &self,
        job: &JobDefinition,
        domains: &[String],
    ) -> IngestResult<(Vec<NewsRecord>, i64)> {
        let fetch = self
            .client
            .fetch_summary(&job.query_template, Recency::Hour, domains)
            .await?;
        let now = Utc::now();

        let (content, title, sentiment_score, sentiment_explanation) = match fetch.reply {
            ProviderReply::Structured(s) => {
                let content = render_structured_summary(&s);
                (
                    content,
                    s.title,
                    clamp_sentiment(s.sentiment_score),
                    s.sentiment_explanation,
                )
            }
            ProviderReply::RawText(raw) => (raw, String::new(), 0, String::new()),
        };

        let title = if title.trim().chars().count() >= MIN_TITLE_LEN {
            truncate_chars(title.trim(), MAX_TITLE_LEN)
        } else {
            generated_title(&job.subcategory, now)
        };

        let mut summary = clean_summary_text(&content);
        if summary.chars().count() > MAX_TITLE_LEN {
            summary = format!("{}...", truncate_chars(&summary, 497));
        }

        let new_rec = NewRecord {
            title,
            summary,
            content: Some(content),
            category: job.category,
            subcategory: job.subcategory.clone(),
            news_type: NewsType::Summary,
            symbols: None,
            sentiment_score,
            sentiment_explanation,
            fetched_at: now,
            is_published: true,
            is_featured: false,
            is_manual: false,
            citations: fetch.citations,
        };

        let records = self.persist_batch(&job.name, vec![new_rec], now).await?;
        Ok((records, fetch.latency_ms))
    }

    /// News jobs keep zero or more discrete articles, skipping short
    /// titles and exact already-stored duplicates.
    async fn run_news_job(
        &self,
        job: &JobDefinition,
        domains: &[String],
    ) -> IngestResult<(Vec<NewsRecord>, i64)> {
        let fetch = self
            .client
            .fetch_articles(&job.query_template, Recency::Day, domains, MAX_ARTICLES)
            .await?;
        let now = Utc::now();

        let mut batch = Vec::new();
        for article in fetch.articles {
            match self
                .article_to_record(article, job.category, &job.subcategory, &fetch.citations, now)
                .await?
            {
                Some(rec) => batch.push(rec),
                None => counter!("ingest_skipped_total").increment(1),
            }
        }

        let records = self.persist_batch(&job.name, batch, now).await?;
        Ok((records, fetch.latency_ms))
    }

    /// On-demand per-symbol fetch; results replace the symbol's TTL slot.
    pub async fn fetch_symbol_news(&self, symbol: &str, actor: &str) -> RunOutcome {
        let symbol = symbol.trim().to_uppercase();
        let job = JobDefinition {
            name: format!("stock_{symbol}"),
            category: Category::Stock,
            subcategory: symbol.to_lowercase(),
            query_template: format!("{symbol} stock news India NSE BSE latest developments"),
            schedule_type: crate::model::ScheduleType::Interval,
            cron_time: None,
            interval_minutes: None,
            enabled: true,
            last_run: None,
            next_run: None,
        };
        let triggered_by = TriggerSource::Manual(actor.to_string());

        counter!("ingest_runs_total").increment(1);
        let started = Utc::now();
        let result = self.run_symbol_inner(&job, &symbol).await;
        match result {
            Ok((records, latency_ms)) => {
                let count = records.len();
                for rec in &records {
                    self.cache.insert(rec.clone());
                }
                self.cache.put_symbol_news(&symbol, records);
                counter!("ingest_records_total").increment(count as u64);
                self.log_attempt(
                    &job,
                    &triggered_by,
                    started,
                    AttemptStatus::Success,
                    Some(latency_ms),
                    Some(count as i64),
                    None,
                )
                .await;
                RunOutcome::ok(count)
            }
            Err(err) => {
                counter!("ingest_failures_total").increment(1);
                let message = err.to_string();
                self.log_attempt(
                    &job,
                    &triggered_by,
                    started,
                    AttemptStatus::Failed,
                    None,
                    None,
                    Some(message.clone()),
                )
                .await;
                RunOutcome::failed(message)
            }
        }
    }

    async fn run_symbol_inner(
        &self,
        job: &JobDefinition,
        symbol: &str,
    ) -> IngestResult<(Vec<NewsRecord>, i64)> {
        let domains = self.resolve_domains().await;
        let fetch = self
            .client
            .fetch_articles(&job.query_template, Recency::Day, &domains, MAX_ARTICLES)
            .await?;
        let now = Utc::now();

        let mut batch = Vec::new();
        for mut article in fetch.articles {
            // A symbol fetch tags every kept record with its own ticker.
            article.stocks_mentioned = vec![symbol.to_string()];
            if let Some(rec) = self
                .article_to_record(article, Category::Stock, &job.subcategory, &fetch.citations, now)
                .await?
            {
                batch.push(rec);
            }
        }

        // Symbol fetches carry no schedule_jobs row to touch.
        let mut tx = self.store.begin().await?;
        let mut records = Vec::with_capacity(batch.len());
        for new_rec in &batch {
            let id = self.store.insert_record(&mut tx, new_rec).await?;
            records.push(materialize(new_rec, id));
        }
        tx.commit().await?;
        Ok((records, fetch.latency_ms))
    }

    /// Normalize one provider article; `None` means skipped.
    async fn article_to_record(
        &self,
        article: ProviderArticle,
        category: Category,
        subcategory: &str,
        citations: &[Citation],
        now: DateTime<Utc>,
    ) -> IngestResult<Option<NewRecord>> {
        let title = article.title.trim().to_string();
        if title.chars().count() < MIN_TITLE_LEN {
            return Ok(None);
        }
        let title = truncate_chars(&title, MAX_TITLE_LEN);
        if self.store.title_exists(&title).await? {
            return Ok(None);
        }

        let summary = if article.summary.is_empty() {
            truncate_chars(&article.content, 500)
        } else {
            article.summary
        };
        let symbols = if article.stocks_mentioned.is_empty() {
            None
        } else {
            Some(article.stocks_mentioned.join(","))
        };

        Ok(Some(NewRecord {
            title,
            summary,
            content: Some(article.content),
            category,
            subcategory: subcategory.to_string(),
            news_type: NewsType::Article,
            symbols,
            sentiment_score: clamp_sentiment(article.sentiment_score),
            sentiment_explanation: article.sentiment_explanation,
            fetched_at: now,
            is_published: true,
            is_featured: false,
            is_manual: false,
            citations: citations.to_vec(),
        }))
    }

    /// One transaction for the whole batch plus the job's last_run; an
    /// error rolls everything back.
    async fn persist_batch(
        &self,
        job_name: &str,
        batch: Vec<NewRecord>,
        ran_at: DateTime<Utc>,
    ) -> Result<Vec<NewsRecord>, IngestError> {
        let mut tx = self.store.begin().await?;
        let mut records = Vec::with_capacity(batch.len());
        for new_rec in &batch {
            let id = self.store.insert_record(&mut tx, new_rec).await?;
            records.push(materialize(new_rec, id));
        }
        self.store.touch_job_run(&mut tx, job_name, ran_at).await?;
        tx.commit().await?;
        Ok(records)
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_attempt(
        &self,
        job: &JobDefinition,
        triggered_by: &TriggerSource,
        timestamp: DateTime<Utc>,
        status: AttemptStatus,
        response_time_ms: Option<i64>,
        news_count: Option<i64>,
        error_message: Option<String>,
    ) {
        let attempt = NewAttempt {
            timestamp,
            job_name: Some(job.name.clone()),
            query: Some(job.query_template.clone()),
            status,
            response_time_ms,
            news_count,
            error_message,
            triggered_by: triggered_by.label(),
        };
        // The attempt log is best-effort; a full disk must not mask the
        // run's own outcome.
        if let Err(e) = self.store.append_attempt(&attempt).await {
            tracing::error!(target: "ingest", job = %job.name, error = %e, "attempt log write failed");
        }
    }
}

fn materialize(new_rec: &NewRecord, id: i64) -> NewsRecord {
    NewsRecord {
        id,
        title: new_rec.title.clone(),
        summary: new_rec.summary.clone(),
        content: new_rec.content.clone(),
        category: new_rec.category,
        subcategory: new_rec.subcategory.clone(),
        news_type: new_rec.news_type,
        symbols: new_rec.symbols.clone(),
        sentiment_score: new_rec.sentiment_score,
        sentiment_explanation: new_rec.sentiment_explanation.clone(),
        published_at: None,
        fetched_at: new_rec.fetched_at,
        is_published: new_rec.is_published,
        is_featured: new_rec.is_featured,
        is_manual: new_rec.is_manual,
        citations: new_rec.citations.clone(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Deterministic title for a market summary whose provider title was too
/// short to keep.
pub fn generated_title(subcategory: &str, dt: DateTime<Utc>) -> String {
    let date = dt.format("%d %b %Y");
    match subcategory {
        "pre_market" => format!("Pre-Market Analysis - {date}"),
        "morning" => format!("Morning Market Update - {date}"),
        "midday" => format!("Mid-Day Market Summary - {date}"),
        "post_market" => format!("Post-Market Summary - {date}"),
        "evening" => format!("Evening Market Wrap - {date}"),
        _ => format!("Market Update - {date}"),
    }
}
