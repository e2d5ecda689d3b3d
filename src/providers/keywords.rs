/// Category vocabulary shared by the providers and the ingest scheduler.
pub const CATEGORIES: [&str; 7] = [
    "top", "politics", "economy", "society", "it", "world", "culture",
];

/// Broad keyword set per category, used when a provider supports multi-term
/// queries. `top` deliberately has no keywords and falls through to the
/// catch-all.
pub fn keywords(category: &str) -> &'static str {
    match category {
        "politics" => "대통령 국회 외교 총선 정당",
        "economy" => "증시 금리 환율 실적 물가 부동산 기업",
        "society" => "사건 사고 교육 노동 복지",
        "it" => "IT AI 인공지능 반도체 네이버 카카오",
        "world" => "국제 미국 중국 일본 러시아 유럽",
        "culture" => "문화 연예 영화 드라마 K-POP",
        _ => "",
    }
}

/// A single short term per category. The search API ranks date-sorted
/// results poorly for long queries, so the adapter collapses to one word.
pub fn search_keyword(category: &str) -> Option<&'static str> {
    match category {
        "economy" => Some("경제"),
        "politics" => Some("정치"),
        "society" => Some("사회"),
        "it" => Some("IT"),
        "world" => Some("국제"),
        "culture" => Some("문화"),
        _ => None,
    }
}

/// Merge the category's base keywords with a caller-supplied query.
pub fn build_query(category: &str, user_query: Option<&str>) -> String {
    let base = keywords(category);
    let user = user_query.unwrap_or("").trim();
    let merged = format!("{} {}", base, user).trim().to_string();
    if merged.is_empty() {
        "한국".to_string()
    } else {
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_merges_and_defaults() {
        assert_eq!(build_query("economy", Some("반도체")), "증시 금리 환율 실적 물가 부동산 기업 반도체");
        assert_eq!(build_query("top", None), "한국");
        assert_eq!(build_query("politics", None), "대통령 국회 외교 총선 정당");
    }
}
