pub mod generic;
pub mod resolve;
pub mod sites;

use scraper::Html;
use tracing::{debug, info, warn};

use crate::fetch::client;
use crate::util::normalize_whitespace;
use crate::TARGET_WEB_REQUEST;
use self::generic::GenericExtractor;
use self::resolve::resolve_final_url;

/// Minimum normalized length for a domain extractor's output to win.
const MIN_EXTRACT_CHARS: usize = 200;

/// A domain-specific body extractor. Extractors are pure over a fetched
/// document; the registry owns URL resolution and the single fetch.
pub trait ArticleExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, url: &str) -> bool;
    fn extract(&self, document: &Html) -> Option<String>;
}

/// Result of one extraction attempt. Never an error: the pipeline treats a
/// failed extraction as a row to retry after its backoff window.
#[derive(Debug)]
pub struct ExtractOutcome {
    pub ok: bool,
    pub extractor: &'static str,
    pub content: Option<String>,
    pub error: Option<String>,
}

impl ExtractOutcome {
    fn success(extractor: &'static str, content: String) -> Self {
        ExtractOutcome {
            ok: true,
            extractor,
            content: Some(content),
            error: None,
        }
    }

    fn failure(extractor: &'static str, error: impl Into<String>) -> Self {
        ExtractOutcome {
            ok: false,
            extractor,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// URLs that are cross-reference viewers, not content sources. Fetching
/// them yields a consent shell, so the chain short-circuits instead.
pub fn skip_reason(url: &str) -> Option<&'static str> {
    if url.contains("news.google.com/rss/articles") || url.contains("news.google.com/articles") {
        return Some("GOOGLE_SKIP");
    }
    None
}

/// Ordered chain of domain extractors with a generic heuristic fallback.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn ArticleExtractor>>,
    fallback: GenericExtractor,
}

impl ExtractorRegistry {
    pub fn new(extractors: Vec<Box<dyn ArticleExtractor>>) -> Self {
        ExtractorRegistry {
            extractors,
            fallback: GenericExtractor,
        }
    }

    /// The standard chain: portal first, generic fallback behind everything.
    pub fn standard() -> Self {
        ExtractorRegistry::new(vec![Box::new(sites::PortalExtractor)])
    }

    /// Resolve the URL, fetch it once, and run the extractor chain.
    pub async fn extract(&self, url: &str) -> ExtractOutcome {
        if url.trim().is_empty() {
            return ExtractOutcome::failure("none", "NO_URL");
        }

        let final_url = resolve_final_url(url).await;
        if final_url != url {
            debug!(target: TARGET_WEB_REQUEST, "Resolved article URL {} -> {}", url, final_url);
        }

        if let Some(reason) = skip_reason(&final_url) {
            info!(target: TARGET_WEB_REQUEST, "Skipping non-content URL {}: {}", final_url, reason);
            return ExtractOutcome::failure("skip", reason);
        }

        let html = match fetch_page(&final_url).await {
            Ok(html) => html,
            Err(err) => {
                warn!(target: TARGET_WEB_REQUEST, "Fetch failed for {}: {}", final_url, err);
                return ExtractOutcome::failure("fetch", err);
            }
        };

        self.select_content(&final_url, &html)
    }

    /// Run the chain over already-fetched HTML. The first supporting
    /// extractor that clears the length floor wins; otherwise the generic
    /// heuristic gets its turn.
    pub fn select_content(&self, url: &str, html: &str) -> ExtractOutcome {
        let document = Html::parse_document(html);

        for extractor in &self.extractors {
            if !extractor.supports(url) {
                continue;
            }
            match extractor.extract(&document) {
                Some(content) => {
                    let normalized = normalize_whitespace(&content);
                    if normalized.chars().count() >= MIN_EXTRACT_CHARS {
                        return ExtractOutcome::success(extractor.name(), normalized);
                    }
                    debug!(
                        target: TARGET_WEB_REQUEST,
                        "Extractor {} returned too little ({} chars) for {}",
                        extractor.name(),
                        normalized.chars().count(),
                        url
                    );
                }
                None => {
                    debug!(target: TARGET_WEB_REQUEST, "Extractor {} found no body for {}", extractor.name(), url);
                }
            }
        }

        match self.fallback.extract_from_html(html) {
            Some(content) => ExtractOutcome::success("generic", content),
            None => ExtractOutcome::failure("generic", "EMPTY"),
        }
    }
}

async fn fetch_page(url: &str) -> Result<String, String> {
    let response = client()
        .get(url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;
    response.text().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blank_url_short_circuits() {
        let registry = ExtractorRegistry::standard();
        let outcome = registry.extract("  ").await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("NO_URL"));
    }

    #[test]
    fn test_skip_patterns() {
        assert_eq!(
            skip_reason("https://news.google.com/rss/articles/abc"),
            Some("GOOGLE_SKIP")
        );
        assert_eq!(
            skip_reason("https://news.google.com/articles/abc"),
            Some("GOOGLE_SKIP")
        );
        assert!(skip_reason("https://press.example.co.kr/articles/1").is_none());
    }

    #[test]
    fn test_domain_extractor_preferred_over_generic() {
        let registry = ExtractorRegistry::standard();
        let body = "기사 본문 문장입니다. ".repeat(40);
        let html = format!(
            r#"<html><body>
                <div id="dic_area">{}</div>
                <div class="also-long">{}</div>
            </body></html>"#,
            body, body
        );

        let outcome =
            registry.select_content("https://n.news.naver.com/article/001/0001", &html);
        assert!(outcome.ok);
        // The portal extractor wins even though the generic fallback would
        // also have succeeded on this document.
        assert_eq!(outcome.extractor, "naver");
    }

    #[test]
    fn test_generic_fallback_on_unsupported_domain() {
        let registry = ExtractorRegistry::standard();
        let body = "일반 추출기가 처리할 본문입니다. ".repeat(40);
        let html = format!("<html><body><div>{}</div></body></html>", body);

        let outcome = registry.select_content("https://press.example.co.kr/a/1", &html);
        assert!(outcome.ok);
        assert_eq!(outcome.extractor, "generic");
    }

    #[test]
    fn test_everything_too_short_is_empty() {
        let registry = ExtractorRegistry::standard();
        let outcome = registry.select_content(
            "https://press.example.co.kr/a/1",
            "<html><body><div>짧다.</div></body></html>",
        );
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("EMPTY"));
    }
}
