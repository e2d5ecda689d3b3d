pub mod keywords;
pub mod rss;
pub mod search;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::db::Database;
use crate::environment::get_env_parsed;
use crate::fetch::DailyBudget;
use crate::util::now_ts;
use crate::TARGET_WEB_REQUEST;
use self::types::{canonical_url, NormalizedArticle};

/// A news source. Implementations map provider payloads into the one
/// canonical article shape and must never fail on a single bad entry.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, category: &str, query: &str, size: usize)
        -> Result<Vec<NormalizedArticle>>;
}

/// Fans out to every configured provider, merges and dedupes the results,
/// and writes them into the store.
pub struct Aggregator {
    providers: Vec<Box<dyn NewsProvider>>,
}

impl Aggregator {
    pub fn new(providers: Vec<Box<dyn NewsProvider>>) -> Self {
        Aggregator { providers }
    }

    /// Standard provider set: the search API when credentials are present,
    /// RSS always. The search budget defaults to the API's daily quota.
    pub fn from_env() -> Self {
        let mut providers: Vec<Box<dyn NewsProvider>> = Vec::new();
        let budget = Arc::new(DailyBudget::new(get_env_parsed(
            "NAVER_DAILY_LIMIT",
            25_000u32,
        )));
        if let Some(search) = search::SearchProvider::from_env(budget) {
            providers.push(Box::new(search));
        }
        providers.push(Box::new(rss::RssProvider));
        Aggregator::new(providers)
    }

    /// Fetch from all providers concurrently. A provider that errors
    /// contributes nothing; it never blocks the others.
    pub async fn fetch_all(
        &self,
        category: &str,
        query: &str,
        size: usize,
    ) -> Vec<NormalizedArticle> {
        let fetches = self.providers.iter().map(|provider| async move {
            match provider.fetch(category, query, size).await {
                Ok(articles) => {
                    info!(target: TARGET_WEB_REQUEST, "Provider {} returned {} articles", provider.name(), articles.len());
                    articles
                }
                Err(err) => {
                    error!(target: TARGET_WEB_REQUEST, "Provider {} failed: {}", provider.name(), err);
                    Vec::new()
                }
            }
        });

        let merged: Vec<NormalizedArticle> =
            join_all(fetches).await.into_iter().flatten().collect();
        merge_dedupe_sort(merged, size)
    }

    /// Fetch, dedupe, and upsert one category. Returns the ids of rows that
    /// are new to the store; everything else was refreshed in place.
    pub async fn ingest(
        &self,
        db: &Database,
        category: &str,
        query: &str,
        size: usize,
    ) -> Result<Vec<i64>> {
        let articles = self.fetch_all(category, query, size).await;
        let now = now_ts();

        let mut inserted_ids = Vec::new();
        for article in &articles {
            match db.upsert_article(article, &now).await {
                Ok(outcome) if outcome.inserted => inserted_ids.push(outcome.id),
                Ok(_) => {}
                Err(err) => {
                    error!(target: TARGET_WEB_REQUEST, "Failed to store article {}: {}", article.external_id, err);
                }
            }
        }

        info!(
            target: TARGET_WEB_REQUEST,
            "Ingested category '{}': {} fetched, {} new",
            category,
            articles.len(),
            inserted_ids.len()
        );
        Ok(inserted_ids)
    }
}

/// Collapse duplicates across providers, keep the better copy of each, and
/// return the newest `size` articles.
pub(crate) fn merge_dedupe_sort(
    items: Vec<NormalizedArticle>,
    size: usize,
) -> Vec<NormalizedArticle> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, NormalizedArticle> = HashMap::new();

    for article in items {
        let key = dedupe_key(&article);
        match by_key.get(&key) {
            None => {
                order.push(key.clone());
                by_key.insert(key, article);
            }
            Some(existing) => {
                if is_better(&article, existing) {
                    by_key.insert(key, article);
                }
            }
        }
    }

    let mut merged: Vec<NormalizedArticle> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();

    // Newest first; undated articles sink to the bottom.
    merged.sort_by(|a, b| {
        let a_ts = a.published_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let b_ts = b.published_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        b_ts.cmp(&a_ts)
    });
    merged.truncate(size);
    merged
}

/// Identity for cross-provider dedupe: canonical URL when present, else
/// title plus publication day.
fn dedupe_key(article: &NormalizedArticle) -> String {
    let url = article.url.trim();
    if !url.is_empty() {
        return format!("U:{}", canonical_url(url));
    }
    let title: String = article
        .title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    let day = article
        .published_at
        .map(|d| d.timestamp() / 86_400)
        .unwrap_or(0);
    format!("T:{}:{}", title, day)
}

/// Prefer the copy with the longer snippet; break ties by recency.
fn is_better(candidate: &NormalizedArticle, incumbent: &NormalizedArticle) -> bool {
    if candidate.summary.len() != incumbent.summary.len() {
        return candidate.summary.len() > incumbent.summary.len();
    }
    match (candidate.published_at, incumbent.published_at) {
        (Some(c), Some(i)) => c > i,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn article(url: &str, title: &str, summary: &str, age_hours: i64) -> NormalizedArticle {
        NormalizedArticle {
            external_id: types::external_id(url, title, None),
            title: title.to_string(),
            summary: summary.to_string(),
            url: url.to_string(),
            image_url: None,
            published_at: Some(Utc::now() - ChronoDuration::hours(age_hours)),
            source_name: "src".to_string(),
            provider: "rss",
            category: "economy".to_string(),
        }
    }

    #[test]
    fn test_dedupe_keeps_better_copy() {
        let short = article("https://a.example.com/1", "기사", "요약", 2);
        let long = article("https://a.example.com/1", "기사", "훨씬 더 긴 요약문입니다", 2);
        let merged = merge_dedupe_sort(vec![short, long], 10);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].summary, "훨씬 더 긴 요약문입니다");
    }

    #[test]
    fn test_sorted_newest_first_and_capped() {
        let a = article("https://a.example.com/1", "a", "", 5);
        let b = article("https://a.example.com/2", "b", "", 1);
        let c = article("https://a.example.com/3", "c", "", 3);
        let merged = merge_dedupe_sort(vec![a, b, c], 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "b");
        assert_eq!(merged[1].title, "c");
    }

    #[test]
    fn test_urlless_items_dedupe_by_title_and_day() {
        let a = article("", "같은 제목!", "x", 1);
        let b = article("", "같은 제목", "xy", 1);
        let merged = merge_dedupe_sort(vec![a, b], 10);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].summary, "xy");
    }
}
