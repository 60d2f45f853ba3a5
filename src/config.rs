// src/config.rs
//! Process configuration from the environment, plus embedded seed data
//! (default jobs, source-domain fallback, symbol directory) shipped with
//! the binary and parsed once on first use.

use chrono::FixedOffset;
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::model::{Category, ScheduleType};

/// Asia/Kolkata; the market clock all default cron times are quoted in.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;
pub const DEFAULT_SYMBOL_TTL_MIN: i64 = 30;

/// Runtime settings, resolved once at boot (after `dotenvy::dotenv()`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    /// Wall-clock offset cron triggers are evaluated in.
    pub utc_offset: FixedOffset,
    pub poll_secs: u64,
    pub worker_slots: usize,
    pub symbol_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let utc_offset = match std::env::var("APP_UTC_OFFSET") {
            Ok(raw) => parse_utc_offset(&raw).unwrap_or_else(|| {
                tracing::warn!(offset = %raw, "unparseable APP_UTC_OFFSET, using +05:30");
                ist()
            }),
            Err(_) => ist(),
        };

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/finsights.db".to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            utc_offset,
            poll_secs: env_parse("SCHEDULER_POLL_SECS", 30),
            worker_slots: env_parse("SCHEDULER_WORKERS", 4),
            symbol_ttl_minutes: env_parse("SYMBOL_CACHE_TTL_MIN", DEFAULT_SYMBOL_TTL_MIN),
        }
    }
}

fn ist() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).expect("IST offset is in range")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse `"+05:30"` / `"-04:00"` (a bare `"05:30"` counts as east).
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let t = s.trim();
    let (sign, rest) = match t.chars().next()? {
        '+' => (1i32, &t[1..]),
        '-' => (-1i32, &t[1..]),
        _ => (1i32, t),
    };
    let (h, m) = rest.split_once(':')?;
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

// ---- Embedded seed data -------------------------------------------------

/// One row of the default job set.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSeed {
    pub name: String,
    pub category: Category,
    pub subcategory: String,
    pub query: String,
    pub schedule: ScheduleType,
    /// "HH:MM", present for cron seeds.
    pub at: Option<String>,
    /// Present for interval seeds.
    pub every_minutes: Option<u32>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Deserialize)]
struct JobsFile {
    jobs: Vec<JobSeed>,
}

static DEFAULT_JOBS: Lazy<Vec<JobSeed>> = Lazy::new(|| {
    let raw = include_str!("../config/default_jobs.toml");
    toml::from_str::<JobsFile>(raw)
        .expect("valid default jobs seed")
        .jobs
});

pub fn default_jobs() -> &'static [JobSeed] {
    &DEFAULT_JOBS
}

#[derive(Deserialize)]
struct SourcesFile {
    domains: Vec<String>,
}

static FALLBACK_SOURCES: Lazy<Vec<String>> = Lazy::new(|| {
    let raw = include_str!("../config/sources.toml");
    toml::from_str::<SourcesFile>(raw)
        .expect("valid source domain seed")
        .domains
});

/// Built-in trusted-domain fallback, used when the store has no active
/// sources and to seed the sources table on first boot.
pub fn fallback_source_domains() -> &'static [String] {
    &FALLBACK_SOURCES
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolSeed {
    pub symbol: String,
    pub company: String,
    pub sector: String,
}

#[derive(Deserialize)]
struct SymbolsFile {
    symbols: Vec<SymbolSeed>,
}

static DEFAULT_SYMBOLS: Lazy<Vec<SymbolSeed>> = Lazy::new(|| {
    let raw = include_str!("../config/symbols.toml");
    toml::from_str::<SymbolsFile>(raw)
        .expect("valid symbol seed")
        .symbols
});

pub fn default_symbols() -> &'static [SymbolSeed] {
    &DEFAULT_SYMBOLS
}
