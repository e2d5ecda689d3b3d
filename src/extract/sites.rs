use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use super::ArticleExtractor;
use crate::util::normalize_whitespace;

static PORTAL_BODY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#dic_area").expect("static selector"));
static PORTAL_FALLBACK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article").expect("static selector"));

/// Extractor for articles served through the Naver news portal, which wraps
/// every publisher in the same markup.
pub struct PortalExtractor;

impl ArticleExtractor for PortalExtractor {
    fn name(&self) -> &'static str {
        "naver"
    }

    fn supports(&self, url: &str) -> bool {
        url.contains("n.news.naver.com") || url.contains("news.naver.com")
    }

    fn extract(&self, document: &Html) -> Option<String> {
        let body = document
            .select(&PORTAL_BODY)
            .next()
            .map(|el| el.text().collect::<Vec<_>>().join(" "));

        let text = match body {
            Some(t) if !t.trim().is_empty() => t,
            _ => document
                .select(&PORTAL_FALLBACK)
                .next()?
                .text()
                .collect::<Vec<_>>()
                .join(" "),
        };

        let normalized = normalize_whitespace(&text);
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }
}
