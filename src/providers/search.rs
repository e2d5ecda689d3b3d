use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::keywords::search_keyword;
use super::types::{external_id, strip_html, NormalizedArticle};
use super::NewsProvider;
use crate::environment::get_env_non_empty;
use crate::fetch::{client, DailyBudget};
use crate::TARGET_WEB_REQUEST;

/// Adapter for the Naver news search API.
///
/// The API is date-sorted but keyword-driven, so the category is collapsed
/// to one short term; results older than a day are dropped because the
/// pipeline only wants fresh coverage to cluster against.
pub struct SearchProvider {
    base_url: String,
    client_id: String,
    client_secret: String,
    budget: Arc<DailyBudget>,
}

/// Fetch more than requested and let the freshness cut trim it down.
const API_DISPLAY: usize = 100;

impl SearchProvider {
    /// Build from `NAVER_BASE_URL` / `NAVER_CLIENT_ID` / `NAVER_CLIENT_SECRET`.
    /// Returns None when credentials are not configured, in which case the
    /// aggregator simply runs without this provider.
    pub fn from_env(budget: Arc<DailyBudget>) -> Option<Self> {
        let client_id = get_env_non_empty("NAVER_CLIENT_ID")?;
        let client_secret = get_env_non_empty("NAVER_CLIENT_SECRET")?;
        let base_url = get_env_non_empty("NAVER_BASE_URL")
            .unwrap_or_else(|| "https://openapi.naver.com/v1/search/news.json".to_string());
        Some(SearchProvider {
            base_url,
            client_id,
            client_secret,
            budget,
        })
    }
}

#[async_trait]
impl NewsProvider for SearchProvider {
    fn name(&self) -> &'static str {
        "naver"
    }

    async fn fetch(
        &self,
        category: &str,
        query: &str,
        size: usize,
    ) -> Result<Vec<NormalizedArticle>> {
        if !self.budget.try_acquire() {
            warn!(target: TARGET_WEB_REQUEST, "Search API budget exhausted, skipping fetch for '{}'", category);
            return Ok(Vec::new());
        }

        let target_query = match search_keyword(category) {
            Some(keyword) => keyword.to_string(),
            None if !query.trim().is_empty() => query.trim().to_string(),
            None => "뉴스".to_string(),
        };
        debug!(target: TARGET_WEB_REQUEST, "Search query for category '{}': '{}'", category, target_query);

        let display = API_DISPLAY.to_string();
        let response = client()
            .get(&self.base_url)
            .query(&[
                ("query", target_query.as_str()),
                ("display", display.as_str()),
                ("sort", "date"),
            ])
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .context("search API request failed")?
            .error_for_status()
            .context("search API returned an error status")?;

        let body: Value = response
            .json()
            .await
            .context("search API response was not JSON")?;

        let articles = map_search_items(&body, category, size);
        info!(target: TARGET_WEB_REQUEST, "Search provider mapped {} articles for '{}'", articles.len(), category);
        Ok(articles)
    }
}

/// Map the raw API payload into normalized articles.
///
/// Malformed entries are skipped one at a time; this function never fails as
/// a whole. Entries older than 24 hours are dropped.
pub(crate) fn map_search_items(body: &Value, category: &str, size: usize) -> Vec<NormalizedArticle> {
    let items = match body.get("items").and_then(Value::as_array) {
        Some(items) => items,
        None => return Vec::new(),
    };

    let cutoff = Utc::now() - ChronoDuration::days(1);
    let mut out = Vec::new();

    for item in items {
        let title = strip_html(item.get("title").and_then(Value::as_str).unwrap_or(""));
        let summary = strip_html(item.get("description").and_then(Value::as_str).unwrap_or(""));
        let url = item
            .get("link")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let pub_date = item.get("pubDate").and_then(Value::as_str).unwrap_or("");

        if title.is_empty() && url.is_empty() {
            debug!(target: TARGET_WEB_REQUEST, "Skipping search entry with no title or link");
            continue;
        }

        let published_at = match DateTime::parse_from_rfc2822(pub_date) {
            Ok(date) => date.with_timezone(&Utc),
            Err(err) => {
                debug!(target: TARGET_WEB_REQUEST, "Skipping search entry with bad pubDate '{}': {}", pub_date, err);
                continue;
            }
        };
        if published_at < cutoff {
            continue;
        }

        let id = external_id(&url, &title, Some(&published_at));
        out.push(NormalizedArticle {
            external_id: id,
            title,
            summary,
            url,
            image_url: None,
            published_at: Some(published_at),
            source_name: "Naver Search".to_string(),
            provider: "naver",
            category: category.to_string(),
        });

        if out.len() >= size {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rfc2822(offset_hours: i64) -> String {
        (Utc::now() - ChronoDuration::hours(offset_hours)).to_rfc2822()
    }

    #[test]
    fn test_malformed_entry_is_skipped_not_fatal() {
        let body = json!({
            "items": [
                { "title": "<b>정상 기사</b>", "description": "요약", "link": "https://a.example.com/1", "pubDate": rfc2822(1) },
                { "title": "날짜 깨진 기사", "link": "https://a.example.com/2", "pubDate": "not a date" },
                { "title": "멀쩡한 기사", "description": "", "link": "https://a.example.com/3", "pubDate": rfc2822(2) },
            ]
        });

        let articles = map_search_items(&body, "economy", 10);
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "정상 기사");
        assert_eq!(articles[1].url, "https://a.example.com/3");
    }

    #[test]
    fn test_stale_entries_are_cut() {
        let body = json!({
            "items": [
                { "title": "어제 뉴스", "link": "https://a.example.com/old", "pubDate": rfc2822(30) },
                { "title": "오늘 뉴스", "link": "https://a.example.com/new", "pubDate": rfc2822(2) },
            ]
        });

        let articles = map_search_items(&body, "it", 10);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "오늘 뉴스");
    }

    #[test]
    fn test_size_cap_applies() {
        let items: Vec<Value> = (0..5)
            .map(|i| {
                json!({ "title": format!("기사 {}", i), "link": format!("https://a.example.com/{}", i), "pubDate": rfc2822(1) })
            })
            .collect();
        let body = json!({ "items": items });
        assert_eq!(map_search_items(&body, "world", 3).len(), 3);
    }
}
