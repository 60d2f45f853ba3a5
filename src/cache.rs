// src/cache.rs
//! In-memory read cache over published records. One mutex guards all
//! mutating and multi-step reading operations; the lock is never held
//! across store or network calls. Records live in an id-keyed arena and
//! the indices hold ids, so a record appears in memory exactly once and
//! an update can relocate it between category buckets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use metrics::gauge;

use crate::model::{Category, NewsRecord, SymbolInfo};
use crate::store::Store;

/// Field changes applied by `apply_update`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<Option<String>>,
    pub category: Option<Category>,
    pub subcategory: Option<String>,
    pub symbols: Option<Option<String>>,
    pub sentiment_score: Option<i32>,
    pub is_featured: Option<bool>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub total_news: usize,
    pub featured_count: usize,
    pub symbols_count: usize,
    pub categories: BTreeMap<String, usize>,
    /// Newest `fetched_at` per "category/subcategory" bucket.
    pub last_updated: BTreeMap<String, DateTime<Utc>>,
}

struct SymbolSlot {
    ids: Vec<i64>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheInner {
    /// Arena of records keyed by id; indices below hold ids, not copies.
    records: HashMap<i64, NewsRecord>,
    /// category -> subcategory -> newest-first ids.
    buckets: HashMap<Category, HashMap<String, Vec<i64>>>,
    /// All published records, newest-first.
    flat: Vec<i64>,
    featured: Vec<i64>,
    symbol_news: HashMap<String, SymbolSlot>,
    symbols: Vec<SymbolInfo>,
    by_sector: BTreeMap<String, Vec<usize>>,
    last_updated: HashMap<(Category, String), DateTime<Utc>>,
}

pub struct NewsCache {
    inner: Mutex<CacheInner>,
    symbol_ttl: Duration,
}

impl NewsCache {
    pub fn new(symbol_ttl_minutes: i64) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            symbol_ttl: Duration::minutes(symbol_ttl_minutes.max(1)),
        }
    }

    /// Full rebuild from the store; used at startup and on explicit reload.
    pub async fn load_from_store(&self, store: &Store) -> Result<usize, sqlx::Error> {
        let records = store.list_published().await?;
        Ok(self.rebuild(records))
    }

    /// Replace the news indices with the given published records (expected
    /// newest-first). Symbol directory and TTL slots are left alone.
    pub fn rebuild(&self, records: Vec<NewsRecord>) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.records.clear();
        inner.buckets.clear();
        inner.flat.clear();
        inner.featured.clear();
        inner.last_updated.clear();

        for rec in records {
            if !rec.is_published {
                continue;
            }
            let key = (rec.category, rec.subcategory.clone());
            // Records arrive newest-first, so the first one seen per bucket
            // carries the bucket's freshest fetch time.
            inner.last_updated.entry(key).or_insert(rec.fetched_at);

            inner
                .buckets
                .entry(rec.category)
                .or_default()
                .entry(rec.subcategory.clone())
                .or_default()
                .push(rec.id);
            inner.flat.push(rec.id);
            if rec.is_featured {
                inner.featured.push(rec.id);
            }
            inner.records.insert(rec.id, rec);
        }

        let total = inner.flat.len();
        gauge!("cache_news_total").set(total as f64);
        total
    }

    /// Head-insert into every relevant index; O(1) amortized, keeps
    /// newest-first ordering without a sort.
    pub fn insert(&self, rec: NewsRecord) {
        if !rec.is_published {
            return;
        }
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        inner
            .buckets
            .entry(rec.category)
            .or_default()
            .entry(rec.subcategory.clone())
            .or_default()
            .insert(0, rec.id);
        inner.flat.insert(0, rec.id);
        if rec.is_featured {
            inner.featured.insert(0, rec.id);
        }
        inner
            .last_updated
            .insert((rec.category, rec.subcategory.clone()), Utc::now());
        inner.records.insert(rec.id, rec);

        gauge!("cache_news_total").set(inner.flat.len() as f64);
    }

    /// Merge field changes into the cached record. A category or
    /// subcategory change relocates the id to its new bucket.
    pub fn apply_update(&self, id: i64, patch: RecordPatch) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let Some(rec) = inner.records.get_mut(&id) else {
            return false;
        };

        let old_category = rec.category;
        let old_subcategory = rec.subcategory.clone();
        let old_featured = rec.is_featured;

        if let Some(title) = patch.title {
            rec.title = title;
        }
        if let Some(summary) = patch.summary {
            rec.summary = summary;
        }
        if let Some(content) = patch.content {
            rec.content = content;
        }
        if let Some(category) = patch.category {
            rec.category = category;
        }
        if let Some(subcategory) = patch.subcategory {
            rec.subcategory = subcategory;
        }
        if let Some(symbols) = patch.symbols {
            rec.symbols = symbols;
        }
        if let Some(score) = patch.sentiment_score {
            rec.sentiment_score = score;
        }
        if let Some(featured) = patch.is_featured {
            rec.is_featured = featured;
        }
        let new_category = rec.category;
        let new_subcategory = rec.subcategory.clone();
        let new_featured = rec.is_featured;

        if (new_category, &new_subcategory) != (old_category, &old_subcategory) {
            remove_from_bucket(&mut inner, old_category, &old_subcategory, id);
            inner
                .buckets
                .entry(new_category)
                .or_default()
                .entry(new_subcategory)
                .or_default()
                .insert(0, id);
        }
        if old_featured != new_featured {
            if new_featured {
                inner.featured.insert(0, id);
            } else {
                inner.featured.retain(|&x| x != id);
            }
        }
        true
    }

    /// Remove from every index; a no-op for an absent id.
    pub fn remove(&self, id: i64) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let Some(rec) = inner.records.remove(&id) else {
            return;
        };
        remove_from_bucket(&mut inner, rec.category, &rec.subcategory, id);
        inner.flat.retain(|&x| x != id);
        inner.featured.retain(|&x| x != id);
        for slot in inner.symbol_news.values_mut() {
            slot.ids.retain(|&x| x != id);
        }
        gauge!("cache_news_total").set(inner.flat.len() as f64);
    }

    pub fn by_id(&self, id: i64) -> Option<NewsRecord> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.records.get(&id).cloned()
    }

    /// With a subcategory: that bucket, truncated. Without: all the
    /// category's buckets merged and re-sorted by fetch time descending.
    pub fn by_category(
        &self,
        category: Category,
        subcategory: Option<&str>,
        limit: usize,
    ) -> Vec<NewsRecord> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let Some(subcats) = inner.buckets.get(&category) else {
            return Vec::new();
        };
        match subcategory {
            Some(sub) => subcats
                .get(sub)
                .map(|ids| collect_records(&inner, ids, limit))
                .unwrap_or_default(),
            None => {
                let mut merged: Vec<&NewsRecord> = subcats
                    .values()
                    .flatten()
                    .filter_map(|id| inner.records.get(id))
                    .collect();
                merged.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
                merged.into_iter().take(limit).cloned().collect()
            }
        }
    }

    pub fn latest(&self, limit: usize) -> Vec<NewsRecord> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        collect_records(&inner, &inner.flat, limit)
    }

    pub fn featured(&self, limit: usize) -> Vec<NewsRecord> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        collect_records(&inner, &inner.featured, limit)
    }

    /// Case-insensitive substring match on title and summary, in flat-list
    /// order. No relevance ranking.
    pub fn search(&self, text: &str, limit: usize) -> Vec<NewsRecord> {
        let needle = text.to_lowercase();
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .flat
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|rec| {
                rec.title.to_lowercase().contains(&needle)
                    || rec.summary.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// TTL slot if fresh, else a linear scan of the flat list by symbol
    /// membership. Callers repopulate the slot after an on-demand fetch.
    pub fn symbol_news(&self, symbol: &str, limit: usize) -> Vec<NewsRecord> {
        let key = symbol.trim().to_uppercase();
        let inner = self.inner.lock().expect("cache mutex poisoned");

        if let Some(slot) = inner.symbol_news.get(&key) {
            if slot.expires_at > Utc::now() {
                return collect_records(&inner, &slot.ids, limit);
            }
        }

        inner
            .flat
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|rec| rec.mentions_symbol(&key))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Cache per-symbol results with a fresh TTL window. The records are
    /// also inserted into the arena so the ids resolve.
    pub fn put_symbol_news(&self, symbol: &str, records: Vec<NewsRecord>) {
        let key = symbol.trim().to_uppercase();
        let expires_at = Utc::now() + self.symbol_ttl;
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        for rec in records {
            inner.records.entry(rec.id).or_insert(rec);
        }
        inner.symbol_news.insert(key, SymbolSlot { ids, expires_at });
    }

    pub fn load_symbols(&self, symbols: Vec<SymbolInfo>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.by_sector.clear();
        for (i, sym) in symbols.iter().enumerate() {
            let sector = sym.sector.clone().unwrap_or_else(|| "Other".to_string());
            inner.by_sector.entry(sector).or_default().push(i);
        }
        inner.symbols = symbols;
    }

    pub fn all_symbols(&self) -> Vec<SymbolInfo> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.symbols.clone()
    }

    pub fn symbols_for_sector(&self, sector: &str) -> Vec<SymbolInfo> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .by_sector
            .get(sector)
            .map(|idxs| idxs.iter().map(|&i| inner.symbols[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Substring match on ticker (uppercased) or company name (lowercased).
    pub fn search_symbols(&self, query: &str, limit: usize) -> Vec<SymbolInfo> {
        let upper = query.to_uppercase();
        let lower = query.to_lowercase();
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .symbols
            .iter()
            .filter(|s| {
                s.symbol.contains(&upper) || s.company_name.to_lowercase().contains(&lower)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn last_updated(&self, category: Category, subcategory: &str) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .last_updated
            .get(&(category, subcategory.to_string()))
            .copied()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let mut categories = BTreeMap::new();
        for cat in Category::ALL {
            if cat == Category::Stock {
                continue;
            }
            let count = inner
                .buckets
                .get(&cat)
                .map(|subcats| subcats.values().map(Vec::len).sum())
                .unwrap_or(0);
            categories.insert(cat.as_str().to_string(), count);
        }
        let last_updated = inner
            .last_updated
            .iter()
            .map(|((cat, sub), ts)| (format!("{}/{}", cat.as_str(), sub), *ts))
            .collect();
        CacheStats {
            total_news: inner.flat.len(),
            featured_count: inner.featured.len(),
            symbols_count: inner.symbols.len(),
            categories,
            last_updated,
        }
    }
}

fn remove_from_bucket(inner: &mut CacheInner, category: Category, subcategory: &str, id: i64) {
    if let Some(subcats) = inner.buckets.get_mut(&category) {
        if let Some(ids) = subcats.get_mut(subcategory) {
            ids.retain(|&x| x != id);
        }
    }
}

fn collect_records(inner: &CacheInner, ids: &[i64], limit: usize) -> Vec<NewsRecord> {
    ids.iter()
        .filter_map(|id| inner.records.get(id))
        .take(limit)
        .cloned()
        .collect()
}
