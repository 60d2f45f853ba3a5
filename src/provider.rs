// src/provider.rs
//! Content provider client: a single Gemini `generateContent` call with
//! Google Search grounding per fetch. The provider answers with markdown
//! that usually wraps a JSON object; parsing is best-effort and a reply
//! that will not parse degrades to `RawText` instead of failing the call.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::model::Citation;

/// Coarse freshness constraint forwarded to the provider prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    Hour,
    Day,
    Week,
    Month,
}

impl Recency {
    fn phrase(&self) -> &'static str {
        match self {
            Recency::Hour => "from the last hour",
            Recency::Day => "from today",
            Recency::Week => "from this week",
            Recency::Month => "from this month",
        }
    }
}

/// A provider answer to a summary fetch: either the structured object we
/// asked for, or the raw text when the reply was not valid JSON.
#[derive(Debug, Clone)]
pub enum ProviderReply {
    Structured(StructuredSummary),
    RawText(String),
}

/// Structured market-summary schema the prompt requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredSummary {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub sectors: Vec<SectorNote>,
    #[serde(default)]
    pub indices: Vec<IndexQuote>,
    #[serde(default)]
    pub market_sentiment: String,
    #[serde(default)]
    pub sentiment_score: i64,
    #[serde(default)]
    pub sentiment_explanation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectorNote {
    pub name: String,
    #[serde(default)]
    pub performance: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexQuote {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub change: String,
}

/// One discrete article from a multi-article fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderArticle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub stocks_mentioned: Vec<String>,
    #[serde(default)]
    pub sentiment_score: i64,
    #[serde(default)]
    pub sentiment_explanation: String,
}

#[derive(Debug, Clone)]
pub struct SummaryFetch {
    pub reply: ProviderReply,
    pub citations: Vec<Citation>,
    pub latency_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ArticleFetch {
    pub articles: Vec<ProviderArticle>,
    pub citations: Vec<Citation>,
    pub latency_ms: i64,
}

/// The seam the pipeline talks through; tests substitute mock impls.
#[async_trait]
pub trait ContentClient: Send + Sync {
    async fn fetch_summary(
        &self,
        query: &str,
        recency: Recency,
        domains: &[String],
    ) -> Result<SummaryFetch, ProviderError>;

    async fn fetch_articles(
        &self,
        query: &str,
        recency: Recency,
        domains: &[String],
        max_articles: usize,
    ) -> Result<ArticleFetch, ProviderError>;
}

// ------------------------------------------------------------
// Gemini client
// ------------------------------------------------------------

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("finsights/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
        }
    }

    pub fn from_config(cfg: &crate::config::AppConfig) -> Self {
        Self::new(cfg.gemini_api_key.clone(), cfg.gemini_model.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str) -> Result<(String, Vec<Citation>), ProviderError> {
        let key = self.api_key.as_deref().ok_or(ProviderError::NotConfigured)?;

        // Wire types local to the one call that uses them.
        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }
        #[derive(Serialize)]
        struct Content<'a> {
            parts: Vec<Part<'a>>,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            contents: Vec<Content<'a>>,
            tools: Vec<serde_json::Value>,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            #[serde(default)]
            content: Option<RespContent>,
            #[serde(rename = "groundingMetadata", default)]
            grounding_metadata: Option<GroundingMetadata>,
        }
        #[derive(Deserialize)]
        struct RespContent {
            #[serde(default)]
            parts: Vec<RespPart>,
        }
        #[derive(Deserialize)]
        struct RespPart {
            #[serde(default)]
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct GroundingMetadata {
            #[serde(rename = "groundingChunks", default)]
            grounding_chunks: Vec<GroundingChunk>,
        }
        #[derive(Deserialize)]
        struct GroundingChunk {
            #[serde(default)]
            web: Option<WebChunk>,
        }
        #[derive(Deserialize)]
        struct WebChunk {
            #[serde(default)]
            uri: String,
            #[serde(default)]
            title: Option<String>,
        }

        let req = Req {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            // response_mime_type cannot be combined with grounding, so the
            // JSON shape is requested in the prompt instead.
            tools: vec![serde_json::json!({ "google_search": {} })],
        };

        let url = format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::BadStatus(status.as_u16()));
        }

        let body: Resp = resp.json().await?;
        let candidate = body.candidates.into_iter().next();

        let text: String = candidate
            .as_ref()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::Empty);
        }

        // Citations are 1-indexed, matching how the body references them.
        let citations = candidate
            .and_then(|c| c.grounding_metadata)
            .map(|g| {
                g.grounding_chunks
                    .into_iter()
                    .filter_map(|ch| ch.web)
                    .enumerate()
                    .map(|(i, web)| Citation {
                        index: i as i32 + 1,
                        url: web.uri,
                        title: web.title,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok((text, citations))
    }
}

#[async_trait]
impl ContentClient for GeminiClient {
    async fn fetch_summary(
        &self,
        query: &str,
        recency: Recency,
        domains: &[String],
    ) -> Result<SummaryFetch, ProviderError> {
        let prompt = format!(
            "{query}\n\nFocus on news {}.{}\n\nRespond with a JSON object containing: \
             title, overview, key_points (array), sectors (array), market_sentiment, \
             indices (array), sentiment_score (-10 to +10), sentiment_explanation.",
            recency.phrase(),
            domain_hint(domains),
        );

        let started = Instant::now();
        let (text, citations) = self.generate(&prompt).await?;
        let latency_ms = started.elapsed().as_millis() as i64;

        Ok(SummaryFetch {
            reply: parse_summary_reply(&text),
            citations,
            latency_ms,
        })
    }

    async fn fetch_articles(
        &self,
        query: &str,
        recency: Recency,
        domains: &[String],
        max_articles: usize,
    ) -> Result<ArticleFetch, ProviderError> {
        let prompt = format!(
            "Find {max_articles} news articles about: {query}\n\
             For each article provide: title, summary, content, stocks_mentioned (array), \
             impact (positive/negative/neutral), sentiment_score (-10 to +10), \
             sentiment_explanation.\n\
             Focus on news {}.{}\n\n\
             Respond with a JSON object containing an \"articles\" array.",
            recency.phrase(),
            domain_hint(domains),
        );

        let started = Instant::now();
        let (text, citations) = self.generate(&prompt).await?;
        let latency_ms = started.elapsed().as_millis() as i64;

        Ok(ArticleFetch {
            articles: parse_articles_reply(&text),
            citations,
            latency_ms,
        })
    }
}

// ------------------------------------------------------------
// Reply parsing + text helpers
// ------------------------------------------------------------

fn domain_hint(domains: &[String]) -> String {
    if domains.is_empty() {
        return String::new();
    }
    let listed = domains
        .iter()
        .take(10)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("\n\nPrefer information from these trusted Indian financial news sources: {listed}.")
}

/// The reply usually fences or prefixes the JSON object; grab the widest
/// `{...}` span before deserializing.
fn extract_json(text: &str) -> Option<&str> {
    static RE_OBJ: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[\s\S]*\}").unwrap());
    RE_OBJ.find(text).map(|m| m.as_str())
}

/// Structured when the JSON parses, raw text otherwise. A formatting
/// glitch must never suppress an otherwise-successful fetch.
pub fn parse_summary_reply(text: &str) -> ProviderReply {
    let Some(json) = extract_json(text) else {
        return ProviderReply::RawText(text.to_string());
    };
    match serde_json::from_str::<StructuredSummary>(json) {
        Ok(s) => ProviderReply::Structured(s),
        Err(_) => ProviderReply::RawText(text.to_string()),
    }
}

/// Zero articles on parse trouble; the pipeline treats that as an empty
/// but successful fetch, matching the summary fallback policy.
pub fn parse_articles_reply(text: &str) -> Vec<ProviderArticle> {
    #[derive(Deserialize)]
    struct ArticlesEnvelope {
        #[serde(default)]
        articles: Vec<ProviderArticle>,
    }
    let Some(json) = extract_json(text) else {
        return Vec::new();
    };
    serde_json::from_str::<ArticlesEnvelope>(json)
        .map(|e| e.articles)
        .unwrap_or_default()
}

/// Render a structured summary to the markdown body stored as content.
pub fn render_structured_summary(s: &StructuredSummary) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !s.overview.is_empty() {
        parts.push(format!("## Overview\n\n{}", s.overview));
    }
    if s.indices.iter().any(|i| !i.name.is_empty()) {
        let mut block = String::from("## Market Indices\n\n");
        for idx in s.indices.iter().filter(|i| !i.name.is_empty()) {
            block.push_str(&format!("- **{}**: {} ({})\n", idx.name, idx.value, idx.change));
        }
        parts.push(block.trim_end().to_string());
    }
    if !s.key_points.is_empty() {
        let bullets = s
            .key_points
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("## Key Points\n\n{bullets}"));
    }
    if s.sectors.iter().any(|n| !n.name.is_empty()) {
        let mut block = String::from("## Sector Performance\n\n");
        for sec in s.sectors.iter().filter(|n| !n.name.is_empty()) {
            block.push_str(&format!("- **{}**: {}", sec.name, sec.performance));
            if let Some(reason) = sec.reason.as_deref().filter(|r| !r.is_empty()) {
                block.push_str(&format!(" - {reason}"));
            }
            block.push('\n');
        }
        parts.push(block.trim_end().to_string());
    }
    if !s.market_sentiment.is_empty() {
        parts.push(format!(
            "## Market Sentiment\n\n**{}**",
            capitalize(&s.market_sentiment)
        ));
    }

    parts.join("\n\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Strip markdown bold/links/bullets, collapse whitespace, cap at 500.
pub fn clean_summary_text(text: &str) -> String {
    static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
    static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
    static RE_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*+]\s+").unwrap());

    if text.is_empty() {
        return String::new();
    }
    let mut out = RE_BOLD.replace_all(text, "$1").to_string();
    out = RE_LINK.replace_all(&out, "$1").to_string();
    out = RE_BULLET.replace_all(&out, "").to_string();
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    if out.chars().count() > 500 {
        let cut: String = out.chars().take(500).collect();
        format!("{cut}...")
    } else {
        out
    }
}
