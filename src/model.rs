// src/model.rs
//! Domain types shared by the store, cache, pipeline, and scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level news buckets. Stored as lowercase text in the `category` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Market,
    Sector,
    Macro,
    Regulation,
    Stock,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Market,
        Category::Sector,
        Category::Macro,
        Category::Regulation,
        Category::Stock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Market => "market",
            Category::Sector => "sector",
            Category::Macro => "macro",
            Category::Regulation => "regulation",
            Category::Stock => "stock",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Some(Category::Market),
            "sector" => Some(Category::Sector),
            "macro" => Some(Category::Macro),
            "regulation" => Some(Category::Regulation),
            "stock" => Some(Category::Stock),
            _ => None,
        }
    }

    /// Human label used by the serving layer.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Market => "Market Updates",
            Category::Sector => "Sector News",
            Category::Macro => "Macro & Economy",
            Category::Regulation => "Regulations",
            Category::Stock => "Stock Specific",
        }
    }
}

/// Whether a record is a synthesized market summary or a discrete article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsType {
    Summary,
    Article,
}

impl NewsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewsType::Summary => "summary",
            NewsType::Article => "article",
        }
    }

    pub fn parse(s: &str) -> Option<NewsType> {
        match s {
            "summary" => Some(NewsType::Summary),
            "article" => Some(NewsType::Article),
            _ => None,
        }
    }
}

/// Source link backing a record, ordered by relevance index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub index: i32, // 1-based, as rendered ([1], [2], …)
    pub url: String,
    pub title: Option<String>,
}

/// One normalized unit of ingested content plus its citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsRecord {
    pub id: i64,
    pub title: String,
    pub summary: String,
    pub content: Option<String>,
    pub category: Category,
    pub subcategory: String, // "general" when the job carries none
    pub news_type: NewsType,
    pub symbols: Option<String>, // comma-joined, e.g. "RELIANCE,TCS"
    pub sentiment_score: i32,    // -10..=+10, 0 is neutral
    pub sentiment_explanation: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub is_published: bool,
    pub is_featured: bool,
    pub is_manual: bool, // authored by hand rather than fetched
    pub citations: Vec<Citation>,
}

impl NewsRecord {
    /// Exact comma-separated membership test, case-insensitive.
    pub fn mentions_symbol(&self, symbol: &str) -> bool {
        let Some(joined) = self.symbols.as_deref() else {
            return false;
        };
        joined
            .split(',')
            .any(|s| s.trim().eq_ignore_ascii_case(symbol.trim()))
    }
}

/// How a job's due time is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Cron,
    Interval,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
        }
    }

    pub fn parse(s: &str) -> Option<ScheduleType> {
        match s {
            "cron" => Some(ScheduleType::Cron),
            "interval" => Some(ScheduleType::Interval),
            _ => None,
        }
    }
}

/// The one meaningful timing rule of a job. Cron jobs fire at a wall-clock
/// time of day; interval jobs fire a fixed duration after the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    DailyAt { hour: u32, minute: u32 },
    Every { minutes: u32 },
}

/// Parse a store-format `"HH:MM"` cron time. Rejects out-of-range values.
pub fn parse_cron_time(s: &str) -> Option<Trigger> {
    let (h, m) = s.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(Trigger::DailyAt { hour, minute })
}

/// A named, schedulable unit of ingestion work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub category: Category,
    pub subcategory: String,
    pub query_template: String,
    pub schedule_type: ScheduleType,
    pub cron_time: Option<String>, // "07:00", meaningful for Cron only
    pub interval_minutes: Option<u32>, // meaningful for Interval only
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>, // advisory; recomputed by the scheduler
}

impl JobDefinition {
    /// Resolve the trigger the `schedule_type` points at, ignoring the other
    /// column. `None` means the row is malformed and the job cannot fire.
    pub fn trigger(&self) -> Option<Trigger> {
        match self.schedule_type {
            ScheduleType::Cron => parse_cron_time(self.cron_time.as_deref()?),
            ScheduleType::Interval => self
                .interval_minutes
                .filter(|m| *m > 0)
                .map(|minutes| Trigger::Every { minutes }),
        }
    }
}

/// Who asked for a job execution. Rendered into the attempt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    Scheduler,
    Startup,
    Manual(String), // actor name, e.g. "admin"
}

impl TriggerSource {
    pub fn label(&self) -> String {
        match self {
            TriggerSource::Scheduler => "scheduler".to_string(),
            TriggerSource::Startup => "startup".to_string(),
            TriggerSource::Manual(actor) => format!("manual:{actor}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<AttemptStatus> {
        match s {
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }
}

/// Immutable log row describing one external-provider invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAttempt {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub job_name: Option<String>,
    pub query: Option<String>,
    pub status: AttemptStatus,
    pub response_time_ms: Option<i64>,
    pub news_count: Option<i64>,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

/// Directory entry for a tracked ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub company_name: String,
    pub sector: Option<String>,
    pub is_index_member: bool,
    pub is_active: bool,
}

/// Clamp provider sentiment into the -10..=+10 contract.
pub fn clamp_sentiment(raw: i64) -> i32 {
    raw.clamp(-10, 10) as i32
}
