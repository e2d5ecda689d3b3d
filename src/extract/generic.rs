use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::util::normalize_whitespace;

/// Minimum normalized length for a block to count as article body.
const MIN_BLOCK_CHARS: usize = 250;
/// Hard cap on extracted content.
const MAX_CONTENT_CHARS: usize = 20_000;

/// Tags whose subtrees are chrome, not content.
const STRIP_TAGS: [&str; 9] = [
    "script", "style", "nav", "footer", "header", "aside", "iframe", "form", "noscript",
];

static BLOCK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article, main, section, div").expect("static selector"));

/// Last-resort extractor for publishers without a dedicated adapter.
///
/// Scores every block-level container and keeps the best one. The scoring
/// rewards long prose with real sentences and a high share of Hangul, which
/// separates article bodies from menus, footers, and ad shells.
pub struct GenericExtractor;

impl GenericExtractor {
    pub fn extract_from_html(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);

        let mut best: Option<(f64, String)> = None;
        for element in document.select(&BLOCK_SELECTOR) {
            let text = normalize_whitespace(&visible_text(element));
            if text.chars().count() < MIN_BLOCK_CHARS {
                continue;
            }

            let score = block_score(&text);
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, text));
            }
        }

        let (_, content) = best?;
        Some(cap_chars(content, MAX_CONTENT_CHARS))
    }
}

/// Text of an element with chrome subtrees skipped.
fn visible_text(element: ElementRef) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&text.text);
            out.push(' ');
        } else if let Some(child_element) = ElementRef::wrap(child) {
            if !STRIP_TAGS.contains(&child_element.value().name()) {
                collect_text(child_element, out);
            }
        }
    }
}

/// `length + sentences*80 + hangul_ratio*600`: length finds substance,
/// sentence count finds prose, the Hangul ratio demotes UI strings.
fn block_score(text: &str) -> f64 {
    let length = text.chars().count() as f64;
    let sentences = sentence_count(text) as f64;
    length + sentences * 80.0 + hangul_ratio(text) * 600.0
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?', '…', '。', '\n']).count()
}

fn hangul_ratio(text: &str) -> f64 {
    let mut hangul = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if ('\u{ac00}'..='\u{d7a3}').contains(&c) {
            hangul += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hangul as f64 / total as f64
    }
}

fn cap_chars(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        return s;
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn korean_paragraph(sentences: usize) -> String {
        "정부는 오늘 새로운 경제 정책을 발표했다. "
            .repeat(sentences)
            .trim()
            .to_string()
    }

    #[test]
    fn test_extracts_main_body_over_chrome() {
        let body = korean_paragraph(20);
        let html = format!(
            r#"<html><body>
                <nav>홈 경제 정치 사회 로그인</nav>
                <div class="content"><p>{}</p></div>
                <footer>회사소개 이용약관 개인정보처리방침</footer>
            </body></html>"#,
            body
        );

        let content = GenericExtractor.extract_from_html(&html).expect("extracts");
        assert!(content.contains("새로운 경제 정책"));
        assert!(!content.contains("이용약관"));
    }

    #[test]
    fn test_short_documents_yield_nothing() {
        let html = "<html><body><div>너무 짧은 본문.</div></body></html>";
        assert!(GenericExtractor.extract_from_html(html).is_none());
    }

    #[test]
    fn test_script_text_does_not_count_as_content() {
        let filler = "x".repeat(5000);
        let html = format!(
            "<html><body><div><script>var data = \"{}\";</script>짧음.</div></body></html>",
            filler
        );
        assert!(GenericExtractor.extract_from_html(&html).is_none());
    }

    #[test]
    fn test_content_is_capped() {
        let body = korean_paragraph(4000);
        let html = format!("<html><body><div>{}</div></body></html>", body);
        let content = GenericExtractor.extract_from_html(&html).expect("extracts");
        assert!(content.chars().count() <= 20_000);
    }
}
