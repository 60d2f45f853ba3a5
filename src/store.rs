// src/store.rs
//! Durable SQLite store. Migrations run at connect time as
//! `CREATE TABLE IF NOT EXISTS` statements; rows are mapped by hand.
//! One transaction per job execution covers the record batch, its
//! citations, and the job's last_run advance.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, Transaction};
use std::str::FromStr;

use crate::config::{JobSeed, SymbolSeed};
use crate::model::{
    AttemptStatus, CallAttempt, Category, Citation, JobDefinition, NewsRecord, NewsType,
    ScheduleType, SymbolInfo,
};

pub struct Store {
    pool: SqlitePool,
}

/// A not-yet-persisted record; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub title: String,
    pub summary: String,
    pub content: Option<String>,
    pub category: Category,
    pub subcategory: String,
    pub news_type: NewsType,
    pub symbols: Option<String>,
    pub sentiment_score: i32,
    pub sentiment_explanation: String,
    pub fetched_at: DateTime<Utc>,
    pub is_published: bool,
    pub is_featured: bool,
    pub is_manual: bool,
    pub citations: Vec<Citation>,
}

/// One row of the attempt log, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub timestamp: DateTime<Utc>,
    pub job_name: Option<String>,
    pub query: Option<String>,
    pub status: AttemptStatus,
    pub response_time_ms: Option<i64>,
    pub news_count: Option<i64>,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl Store {
    /// Open (creating if missing) and migrate the database.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                content TEXT,
                category TEXT NOT NULL,
                subcategory TEXT NOT NULL DEFAULT 'general',
                news_type TEXT NOT NULL DEFAULT 'article',
                symbols TEXT,
                sentiment_score INTEGER NOT NULL DEFAULT 0,
                sentiment_explanation TEXT NOT NULL DEFAULT '',
                published_at DATETIME,
                fetched_at DATETIME NOT NULL,
                is_published INTEGER NOT NULL DEFAULT 1,
                is_featured INTEGER NOT NULL DEFAULT 0,
                is_manual INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS citations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                news_id INTEGER NOT NULL,
                citation_index INTEGER NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                FOREIGN KEY (news_id) REFERENCES news(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedule_jobs (
                job_name TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                subcategory TEXT NOT NULL DEFAULT 'general',
                query_template TEXT NOT NULL,
                schedule_type TEXT NOT NULL,
                cron_time TEXT,
                interval_minutes INTEGER,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                last_run DATETIME,
                next_run DATETIME
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS call_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp DATETIME NOT NULL,
                job_name TEXT,
                query TEXT,
                status TEXT NOT NULL,
                response_time_ms INTEGER,
                news_count INTEGER,
                error_message TEXT,
                triggered_by TEXT NOT NULL DEFAULT 'scheduler'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_sources (
                domain TEXT PRIMARY KEY,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_symbols (
                symbol TEXT PRIMARY KEY,
                company_name TEXT NOT NULL,
                sector TEXT,
                is_index_member INTEGER NOT NULL DEFAULT 1,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_news_title ON news(title)",
            "CREATE INDEX IF NOT EXISTS idx_news_category ON news(category, subcategory)",
            "CREATE INDEX IF NOT EXISTS idx_news_fetched_at ON news(fetched_at)",
            "CREATE INDEX IF NOT EXISTS idx_citations_news_id ON citations(news_id)",
            "CREATE INDEX IF NOT EXISTS idx_attempts_timestamp ON call_attempts(timestamp)",
        ];
        for sql in indexes {
            sqlx::query(sql).execute(pool).await?;
        }

        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'_, sqlx::Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    // ---- records --------------------------------------------------------

    /// Insert one record plus its citations inside the caller's transaction.
    /// Returns the assigned id.
    pub async fn insert_record(
        &self,
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        rec: &NewRecord,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO news (title, summary, content, category, subcategory, news_type,
                              symbols, sentiment_score, sentiment_explanation,
                              fetched_at, is_published, is_featured, is_manual)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&rec.title)
        .bind(&rec.summary)
        .bind(&rec.content)
        .bind(rec.category.as_str())
        .bind(&rec.subcategory)
        .bind(rec.news_type.as_str())
        .bind(&rec.symbols)
        .bind(rec.sentiment_score)
        .bind(&rec.sentiment_explanation)
        .bind(rec.fetched_at)
        .bind(rec.is_published)
        .bind(rec.is_featured)
        .bind(rec.is_manual)
        .fetch_one(&mut **tx)
        .await?;
        let id: i64 = row.try_get("id")?;

        for cit in &rec.citations {
            sqlx::query(
                "INSERT INTO citations (news_id, citation_index, url, title) VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(cit.index)
            .bind(&cit.url)
            .bind(&cit.title)
            .execute(&mut **tx)
            .await?;
        }

        Ok(id)
    }

    pub async fn record_by_id(&self, id: i64) -> Result<Option<NewsRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM news WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut rec = row_to_record(&row)?;
                rec.citations = self.citations_for(id).await?;
                Ok(Some(rec))
            }
            None => Ok(None),
        }
    }

    /// Case-sensitive exact match; the sole deduplication rule.
    pub async fn title_exists(&self, title: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM news WHERE title = $1 LIMIT 1")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// All published records newest-first, citations attached; the cache
    /// rebuild source.
    pub async fn list_published(&self) -> Result<Vec<NewsRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM news WHERE is_published = 1 ORDER BY fetched_at DESC")
            .fetch_all(&self.pool)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(row_to_record(row)?);
        }

        let cit_rows = sqlx::query(
            "SELECT c.* FROM citations c JOIN news n ON n.id = c.news_id \
             WHERE n.is_published = 1 ORDER BY c.news_id, c.citation_index",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut by_news: std::collections::HashMap<i64, Vec<Citation>> =
            std::collections::HashMap::new();
        for row in &cit_rows {
            let news_id: i64 = row.try_get("news_id")?;
            by_news.entry(news_id).or_default().push(row_to_citation(row)?);
        }
        for rec in &mut records {
            if let Some(cits) = by_news.remove(&rec.id) {
                rec.citations = cits;
            }
        }
        Ok(records)
    }

    pub async fn update_record_flags(
        &self,
        id: i64,
        is_published: Option<bool>,
        is_featured: Option<bool>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE news SET is_published = COALESCE($2, is_published), \
             is_featured = COALESCE($3, is_featured) WHERE id = $1",
        )
        .bind(id)
        .bind(is_published)
        .bind(is_featured)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Citations cascade via the foreign key.
    pub async fn delete_record(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM news WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn citations_for(&self, news_id: i64) -> Result<Vec<Citation>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM citations WHERE news_id = $1 ORDER BY citation_index",
        )
        .bind(news_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_citation).collect()
    }

    // ---- jobs -----------------------------------------------------------

    /// Insert-if-absent per job name; existing rows keep admin edits.
    pub async fn seed_jobs(&self, seeds: &[JobSeed]) -> Result<usize, sqlx::Error> {
        let mut inserted = 0usize;
        for seed in seeds {
            let result = sqlx::query(
                r#"
                INSERT INTO schedule_jobs
                    (job_name, category, subcategory, query_template, schedule_type,
                     cron_time, interval_minutes, is_enabled)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT(job_name) DO NOTHING
                "#,
            )
            .bind(&seed.name)
            .bind(seed.category.as_str())
            .bind(&seed.subcategory)
            .bind(&seed.query)
            .bind(seed.schedule.as_str())
            .bind(&seed.at)
            .bind(seed.every_minutes)
            .bind(seed.enabled)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    pub async fn job_by_name(&self, name: &str) -> Result<Option<JobDefinition>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM schedule_jobs WHERE job_name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobDefinition>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM schedule_jobs ORDER BY job_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    pub async fn list_enabled_jobs(&self) -> Result<Vec<JobDefinition>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM schedule_jobs WHERE is_enabled = 1 ORDER BY job_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    pub async fn set_job_enabled(&self, name: &str, enabled: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE schedule_jobs SET is_enabled = $2 WHERE job_name = $1")
            .bind(name)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_job_timing(
        &self,
        name: &str,
        cron_time: Option<&str>,
        interval_minutes: Option<u32>,
    ) -> Result<bool, sqlx::Error> {
        let schedule_type = if cron_time.is_some() {
            Some(ScheduleType::Cron.as_str())
        } else if interval_minutes.is_some() {
            Some(ScheduleType::Interval.as_str())
        } else {
            None
        };
        let result = sqlx::query(
            "UPDATE schedule_jobs SET \
             cron_time = COALESCE($2, cron_time), \
             interval_minutes = COALESCE($3, interval_minutes), \
             schedule_type = COALESCE($4, schedule_type) \
             WHERE job_name = $1",
        )
        .bind(name)
        .bind(cron_time)
        .bind(interval_minutes)
        .bind(schedule_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Advance last_run inside the job execution's transaction.
    pub async fn touch_job_run(
        &self,
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        name: &str,
        ran_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE schedule_jobs SET last_run = $2 WHERE job_name = $1")
            .bind(name)
            .bind(ran_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_job_next_run(
        &self,
        name: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE schedule_jobs SET next_run = $2 WHERE job_name = $1")
            .bind(name)
            .bind(next_run)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- attempt log ----------------------------------------------------

    pub async fn append_attempt(&self, attempt: &NewAttempt) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO call_attempts
                (timestamp, job_name, query, status, response_time_ms, news_count,
                 error_message, triggered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(attempt.timestamp)
        .bind(&attempt.job_name)
        .bind(&attempt.query)
        .bind(attempt.status.as_str())
        .bind(attempt.response_time_ms)
        .bind(attempt.news_count)
        .bind(&attempt.error_message)
        .bind(&attempt.triggered_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_attempts(&self, limit: i64) -> Result<Vec<CallAttempt>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM call_attempts ORDER BY timestamp DESC, id DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_attempt).collect()
    }

    // ---- sources + symbols ----------------------------------------------

    pub async fn active_source_domains(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT domain FROM news_sources WHERE is_active = 1 ORDER BY domain")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| r.try_get("domain")).collect()
    }

    pub async fn seed_sources(&self, domains: &[String]) -> Result<usize, sqlx::Error> {
        let mut inserted = 0usize;
        for domain in domains {
            let result = sqlx::query(
                "INSERT INTO news_sources (domain, is_active) VALUES ($1, 1) \
                 ON CONFLICT(domain) DO NOTHING",
            )
            .bind(domain)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    pub async fn active_symbols(&self) -> Result<Vec<SymbolInfo>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM stock_symbols WHERE is_active = 1 ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SymbolInfo {
                    symbol: row.try_get("symbol")?,
                    company_name: row.try_get("company_name")?,
                    sector: row.try_get("sector")?,
                    is_index_member: row.try_get("is_index_member")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }

    pub async fn seed_symbols(&self, seeds: &[SymbolSeed]) -> Result<usize, sqlx::Error> {
        let mut inserted = 0usize;
        for seed in seeds {
            let result = sqlx::query(
                "INSERT INTO stock_symbols (symbol, company_name, sector, is_index_member, is_active) \
                 VALUES ($1, $2, $3, 1, 1) ON CONFLICT(symbol) DO NOTHING",
            )
            .bind(&seed.symbol)
            .bind(&seed.company)
            .bind(&seed.sector)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }
}

// ---- row mapping --------------------------------------------------------

fn row_to_record(row: &SqliteRow) -> Result<NewsRecord, sqlx::Error> {
    let category_raw: String = row.try_get("category")?;
    let news_type_raw: String = row.try_get("news_type")?;
    Ok(NewsRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        content: row.try_get("content")?,
        category: Category::parse(&category_raw).unwrap_or(Category::Market),
        subcategory: row.try_get("subcategory")?,
        news_type: NewsType::parse(&news_type_raw).unwrap_or(NewsType::Article),
        symbols: row.try_get("symbols")?,
        sentiment_score: row.try_get("sentiment_score")?,
        sentiment_explanation: row.try_get("sentiment_explanation")?,
        published_at: row.try_get("published_at")?,
        fetched_at: row.try_get("fetched_at")?,
        is_published: row.try_get("is_published")?,
        is_featured: row.try_get("is_featured")?,
        is_manual: row.try_get("is_manual")?,
        citations: Vec::new(),
    })
}

fn row_to_job(row: &SqliteRow) -> Result<JobDefinition, sqlx::Error> {
    let category_raw: String = row.try_get("category")?;
    let schedule_raw: String = row.try_get("schedule_type")?;
    Ok(JobDefinition {
        name: row.try_get("job_name")?,
        category: Category::parse(&category_raw).unwrap_or(Category::Market),
        subcategory: row.try_get("subcategory")?,
        query_template: row.try_get("query_template")?,
        schedule_type: ScheduleType::parse(&schedule_raw).unwrap_or(ScheduleType::Interval),
        cron_time: row.try_get("cron_time")?,
        interval_minutes: row.try_get("interval_minutes")?,
        enabled: row.try_get("is_enabled")?,
        last_run: row.try_get("last_run")?,
        next_run: row.try_get("next_run")?,
    })
}

fn row_to_citation(row: &SqliteRow) -> Result<Citation, sqlx::Error> {
    Ok(Citation {
        index: row.try_get("citation_index")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
    })
}

fn row_to_attempt(row: &SqliteRow) -> Result<CallAttempt, sqlx::Error> {
    let status_raw: String = row.try_get("status")?;
    Ok(CallAttempt {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        job_name: row.try_get("job_name")?,
        query: row.try_get("query")?,
        status: AttemptStatus::parse(&status_raw).unwrap_or(AttemptStatus::Failed),
        response_time_ms: row.try_get("response_time_ms")?,
        news_count: row.try_get("news_count")?,
        error_message: row.try_get("error_message")?,
        triggered_by: row.try_get("triggered_by")?,
    })
}
