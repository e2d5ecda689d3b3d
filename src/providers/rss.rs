use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use feed_rs::parser;
use std::io::Cursor;
use tracing::{debug, info, warn};

use super::types::{external_id, strip_html, NormalizedArticle};
use super::NewsProvider;
use crate::environment::get_env_var_as_vec;
use crate::fetch::client;
use crate::TARGET_WEB_REQUEST;

/// Adapter for Google News RSS feeds, one or more per category.
///
/// Feed URLs come from `NEWS_RSS_FEEDS_<CATEGORY>` (semicolon separated).
/// A feed that fails to download or parse is logged and skipped; it never
/// takes the other feeds down with it.
pub struct RssProvider;

#[async_trait]
impl NewsProvider for RssProvider {
    fn name(&self) -> &'static str {
        "google_rss"
    }

    async fn fetch(
        &self,
        category: &str,
        _query: &str,
        size: usize,
    ) -> Result<Vec<NormalizedArticle>> {
        let var = format!("NEWS_RSS_FEEDS_{}", category.to_uppercase());
        let feeds = get_env_var_as_vec(&var, ';');
        if feeds.is_empty() {
            debug!(target: TARGET_WEB_REQUEST, "No RSS feeds configured for category '{}'", category);
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for feed_url in &feeds {
            match read_feed(feed_url, category, size).await {
                Ok(articles) => out.extend(articles),
                Err(err) => {
                    warn!(target: TARGET_WEB_REQUEST, "Failed to read feed {}: {}", feed_url, err);
                }
            }
            if out.len() >= size {
                break;
            }
        }
        out.truncate(size);

        info!(target: TARGET_WEB_REQUEST, "RSS provider mapped {} articles for '{}'", out.len(), category);
        Ok(out)
    }
}

async fn read_feed(feed_url: &str, category: &str, size: usize) -> Result<Vec<NormalizedArticle>> {
    let body = client()
        .get(feed_url)
        .header(reqwest::header::ACCEPT_CHARSET, "UTF-8")
        .send()
        .await
        .context("feed request failed")?
        .error_for_status()
        .context("feed returned an error status")?
        .text()
        .await
        .context("failed to read feed body")?;

    parse_feed(&body, category, size)
}

/// Parse one RSS/Atom document into normalized articles. Entries missing a
/// link and title are skipped individually.
pub(crate) fn parse_feed(body: &str, category: &str, size: usize) -> Result<Vec<NormalizedArticle>> {
    let feed = parser::parse(Cursor::new(body)).context("feed did not parse as RSS or Atom")?;

    let source_name = feed
        .title
        .map(|t| t.content)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "RSS".to_string());

    let mut out = Vec::new();
    for entry in feed.entries {
        let title = strip_html(
            entry
                .title
                .as_ref()
                .map(|t| t.content.as_str())
                .unwrap_or(""),
        );
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default();
        if title.is_empty() && link.is_empty() {
            debug!(target: TARGET_WEB_REQUEST, "Skipping feed entry with no title or link");
            continue;
        }

        let summary = strip_html(
            entry
                .summary
                .as_ref()
                .map(|t| t.content.as_str())
                .unwrap_or(""),
        );
        let published_at = entry.published.map(|d| d.with_timezone(&Utc));

        let id = external_id(&link, &title, published_at.as_ref());
        out.push(NormalizedArticle {
            external_id: id,
            title,
            summary,
            url: link,
            image_url: None,
            published_at,
            source_name: source_name.clone(),
            provider: "google_rss",
            category: category.to_string(),
        });

        if out.len() >= size {
            break;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>경제 뉴스 모음</title>
    <item>
      <title>환율 급등, 당국 개입 시사</title>
      <link>https://news.google.com/rss/articles/token-one</link>
      <description>&lt;b&gt;환율이&lt;/b&gt; 장중 급등했다.</description>
      <pubDate>Wed, 05 Aug 2026 02:00:00 GMT</pubDate>
    </item>
    <item>
      <title></title>
    </item>
    <item>
      <title>반도체 수출 반등</title>
      <link>https://news.google.com/rss/articles/token-two</link>
      <pubDate>Wed, 05 Aug 2026 01:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_skips_empty_entries() {
        let articles = parse_feed(SAMPLE_FEED, "economy", 10).expect("parses");
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "환율 급등, 당국 개입 시사");
        assert_eq!(articles[0].summary, "환율이 장중 급등했다.");
        assert_eq!(articles[0].provider, "google_rss");
        assert_eq!(articles[0].source_name, "경제 뉴스 모음");
        assert!(articles[0].published_at.is_some());
    }

    #[test]
    fn test_parse_feed_honors_size() {
        let articles = parse_feed(SAMPLE_FEED, "economy", 1).expect("parses");
        assert_eq!(articles.len(), 1);
    }

    #[test]
    fn test_garbage_is_an_error_not_a_panic() {
        assert!(parse_feed("this is not xml at all", "economy", 5).is_err());
    }
}
