use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use tracing::{debug, warn};

use crate::fetch::resolver_client;
use crate::TARGET_WEB_REQUEST;

/// Google News RSS wraps the publisher URL in a base64 token under
/// `/rss/articles/<token>`. Decoding it locally saves a network hop and
/// works even when the viewer page refuses bots.
pub fn decode_google_rss_url(url: &str) -> Option<String> {
    let marker = "/rss/articles/";
    let idx = url.find(marker)?;
    let mut token = &url[idx + marker.len()..];
    if let Some(q) = token.find('?') {
        token = &token[..q];
    }

    // Restore base64 padding the URL form drops.
    let mut padded = token.to_string();
    let rem = padded.len() % 4;
    if rem != 0 {
        padded.push_str(&"=".repeat(4 - rem));
    }

    let decoded = URL_SAFE.decode(padded).ok()?;
    // The token is a protobuf blob; the URL is embedded as plain text.
    let text = String::from_utf8_lossy(&decoded);
    let start = text.find("https://").or_else(|| text.find("http://"))?;
    let tail = &text[start..];
    let end = tail
        .char_indices()
        .find(|(_, c)| {
            c.is_whitespace() || c.is_control() || *c == '"' || *c == '\'' || *c == '\\' || *c == '\u{fffd}'
        })
        .map(|(i, _)| i)
        .unwrap_or(tail.len());

    let real = tail[..end].trim();
    if real.starts_with("http") {
        Some(real.to_string())
    } else {
        None
    }
}

/// Resolve a possibly-indirect article link to the publisher's URL:
/// decode Google RSS tokens first, then follow redirects to the final
/// location. Resolution failure falls back to the best URL known so far.
pub async fn resolve_final_url(url: &str) -> String {
    let trimmed = url.trim();
    let mut current = trimmed.to_string();

    if let Some(decoded) = decode_google_rss_url(trimmed) {
        debug!(target: TARGET_WEB_REQUEST, "Decoded feed token to {}", decoded);
        current = decoded;
    }

    match resolver_client().get(&current).send().await {
        Ok(response) => response.url().to_string(),
        Err(err) => {
            warn!(target: TARGET_WEB_REQUEST, "URL resolution failed for {}: {}", current, err);
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_round_trip() {
        // Simulate the token layout: junk bytes around a plain-text URL.
        let mut payload = vec![0x08u8, 0x13, 0x22];
        payload.extend_from_slice("https://press.example.co.kr/articles/20260805123".as_bytes());
        payload.push(0xd2);
        payload.push(0x01);
        let token = URL_SAFE.encode(&payload).trim_end_matches('=').to_string();
        let url = format!("https://news.google.com/rss/articles/{}?oc=5&hl=ko", token);

        assert_eq!(
            decode_google_rss_url(&url).as_deref(),
            Some("https://press.example.co.kr/articles/20260805123")
        );
    }

    #[test]
    fn test_non_token_urls_decode_to_none() {
        assert!(decode_google_rss_url("https://press.example.co.kr/a/1").is_none());
        assert!(decode_google_rss_url("https://news.google.com/rss/articles/!!!").is_none());
    }
}
