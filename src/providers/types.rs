use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;
use urlnorm::UrlNormalizer;

/// The one canonical article shape every provider maps into.
#[derive(Clone, Debug)]
pub struct NormalizedArticle {
    pub external_id: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub provider: &'static str,
    pub category: String,
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Strip markup and the handful of entities search APIs embed in titles
/// and snippets.
pub fn strip_html(input: &str) -> String {
    let without_tags = TAG_RE.replace_all(input, "");
    without_tags
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Normalized form of a URL for identity and dedupe purposes. Unparseable
/// URLs fall back to a trimmed, fragment-free string.
pub fn canonical_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) => UrlNormalizer::default().compute_normalization_string(&parsed),
        Err(_) => {
            let trimmed = url.trim();
            match trimmed.find('#') {
                Some(idx) => trimmed[..idx].to_string(),
                None => trimmed.to_string(),
            }
        }
    }
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic external id: the canonical URL when present, otherwise
/// title and publication time. Re-fetching the same item always produces
/// the same id, which is what makes ingestion idempotent.
pub fn external_id(url: &str, title: &str, published_at: Option<&DateTime<Utc>>) -> String {
    if !url.trim().is_empty() {
        return sha256_hex(&canonical_url(url));
    }
    let published = published_at
        .map(|d| d.to_rfc3339())
        .unwrap_or_default();
    sha256_hex(&format!("{}|{}", title.trim(), published))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<b>금리</b> 인하 &quot;발표&quot;"),
            "금리 인하 \"발표\""
        );
        assert_eq!(strip_html("  plain  "), "plain");
    }

    #[test]
    fn test_external_id_is_deterministic() {
        let a = external_id("https://news.example.com/a?x=1", "t", None);
        let b = external_id("https://news.example.com/a?x=1", "other title", None);
        // Same URL, same id regardless of title.
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_external_id_falls_back_to_title_and_date() {
        let date = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        let a = external_id("", "속보 제목", Some(&date));
        let b = external_id("", "속보 제목", Some(&date));
        let c = external_id("", "다른 제목", Some(&date));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
