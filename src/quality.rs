use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Headline words that correlate with clickbait framing.
const SENSATIONAL: [&str; 12] = [
    "충격", "경악", "단독", "속보", "대반전", "논란", "발칵", "파장", "결국", "폭로", "초유",
    "전격",
];

/// Trailing particles stripped before token comparison, longest first so
/// "에서" wins over "에".
const JOSA: [&str; 14] = [
    "에서", "으로", "까지", "은", "는", "이", "가", "을", "를", "에", "로", "도", "만", "의",
];

/// Evidence similarity at or above this is a solid match.
const EVIDENCE_OK: f64 = 0.30;
/// Below OK but at or above this is a weak match.
const EVIDENCE_WEAK: f64 = 0.15;
/// When scoring against a bare title, be a little more forgiving.
const EVIDENCE_TITLE_FLOOR: f64 = 0.10;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9A-Za-z가-힣]+").expect("valid token regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Weak,
    Fail,
}

/// One specific trust concern. `EvidenceGap` is the blocking flag: a body
/// that mostly fails to support its own summary cannot earn a positive
/// badge no matter the score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskFlag {
    LowCrossSource,
    LowEvidence,
    EvidenceGap,
    TitleBodyMismatch,
    SensationalTitle,
    ShortContent,
}

impl RiskFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlag::LowCrossSource => "LOW_CROSS_SOURCE",
            RiskFlag::LowEvidence => "LOW_EVIDENCE",
            RiskFlag::EvidenceGap => "EVIDENCE_GAP",
            RiskFlag::TitleBodyMismatch => "TITLE_BODY_MISMATCH",
            RiskFlag::SensationalTitle => "SENSATIONAL_TITLE",
            RiskFlag::ShortContent => "SHORT_CONTENT",
        }
    }
}

pub fn flags_to_json(flags: &[RiskFlag]) -> String {
    let codes: Vec<&str> = flags.iter().map(RiskFlag::as_str).collect();
    serde_json::to_string(&codes).unwrap_or_else(|_| "[]".to_string())
}

/// Three-valued trust indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Badge {
    Trusted,
    Caution,
    Suspect,
}

impl Badge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Badge::Trusted => "TRUSTED",
            Badge::Caution => "CAUTION",
            Badge::Suspect => "SUSPECT",
        }
    }
}

/// The one badge rule, used for articles and clusters alike. Pure on
/// purpose: same score and flags, same badge, everywhere.
pub fn badge_for(score: i64, flags: &[RiskFlag]) -> Badge {
    if flags.contains(&RiskFlag::EvidenceGap) || score < 40 {
        Badge::Suspect
    } else if score >= 75 {
        Badge::Trusted
    } else {
        Badge::Caution
    }
}

#[derive(Clone, Debug)]
pub struct Assessment {
    pub score: i64,
    pub flags: Vec<RiskFlag>,
    pub badge: Badge,
}

/// Score one article in the context of its cluster.
///
/// `cross_source_count` is the number of distinct providers in the
/// article's cluster; two or more earns the corroboration bonus and
/// clears the lone-source flag.
pub fn assess(title: &str, ai_summary: &str, content: &str, cross_source_count: i64) -> Assessment {
    // No model summary yet: verify the headline against the body instead.
    let title_only = ai_summary.trim().is_empty();
    let target = if title_only { title } else { ai_summary };

    let summary_sentences = split_sentences(target);
    let content_sentences = split_sentences(content);

    let mut ok = 0usize;
    let mut weak = 0usize;
    for sentence in &summary_sentences {
        let (_, similarity) = best_evidence(sentence, &content_sentences);
        let mut verdict = verdict_for(similarity);
        if title_only && verdict == Verdict::Fail && similarity >= EVIDENCE_TITLE_FLOOR {
            verdict = Verdict::Weak;
        }
        match verdict {
            Verdict::Ok => ok += 1,
            Verdict::Weak => weak += 1,
            Verdict::Fail => {}
        }
    }

    let total = summary_sentences.len().max(1) as f64;
    let ok_ratio = ok as f64 / total;
    let weak_ratio = weak as f64 / total;
    let fail_ratio = (1.0 - ok_ratio - weak_ratio).max(0.0);

    let content_chars = content.chars().count();
    let mut flags = Vec::new();

    let title_tokens: HashSet<String> = tokenize(title).into_iter().collect();
    let content_tokens: HashSet<String> = tokenize(content).into_iter().collect();
    if jaccard(&title_tokens, &content_tokens) < 0.05 && content_chars > 100 {
        flags.push(RiskFlag::TitleBodyMismatch);
    }
    if SENSATIONAL.iter().any(|w| title.contains(w)) {
        flags.push(RiskFlag::SensationalTitle);
    }
    if ok_ratio < 0.4 {
        flags.push(RiskFlag::LowEvidence);
    }
    if fail_ratio >= 0.5 {
        flags.push(RiskFlag::EvidenceGap);
    }
    if cross_source_count <= 1 {
        flags.push(RiskFlag::LowCrossSource);
    }
    if content_chars < 200 {
        flags.push(RiskFlag::ShortContent);
    }

    let mut score: i64 = 100;
    score -= (50.0 * fail_ratio) as i64;
    score -= (20.0 * (0.4 - ok_ratio).max(0.0)) as i64;
    score += ((cross_source_count - 1) * 5).clamp(0, 15);
    if flags.contains(&RiskFlag::TitleBodyMismatch) {
        score -= 20;
    }
    if flags.contains(&RiskFlag::SensationalTitle) {
        score -= 10;
    }
    if flags.contains(&RiskFlag::ShortContent) {
        score -= 10;
    }
    let score = score.clamp(0, 100);

    Assessment {
        score,
        flags: flags.clone(),
        badge: badge_for(score, &flags),
    }
}

/// Rounded mean of member scores, the cluster-level aggregate.
pub fn aggregate_score(scores: &[i64]) -> i64 {
    if scores.is_empty() {
        return 0;
    }
    let sum: i64 = scores.iter().sum();
    ((sum as f64 / scores.len() as f64).round() as i64).clamp(0, 100)
}

fn verdict_for(similarity: f64) -> Verdict {
    if similarity >= EVIDENCE_OK {
        Verdict::Ok
    } else if similarity >= EVIDENCE_WEAK {
        Verdict::Weak
    } else {
        Verdict::Fail
    }
}

/// The content sentence that best supports a summary sentence, by cosine
/// over token counts.
pub fn best_evidence(summary_sentence: &str, content_sentences: &[String]) -> (String, f64) {
    let summary_tokens = tokenize(summary_sentence);
    if summary_tokens.is_empty() {
        return (String::new(), 0.0);
    }
    let summary_counts = counter(&summary_tokens);

    let mut best_text = String::new();
    let mut best_score = 0.0;
    for candidate in content_sentences {
        let tokens = tokenize(candidate);
        if tokens.is_empty() {
            continue;
        }
        let similarity = cosine_counter(&summary_counts, &counter(&tokens));
        if similarity > best_score {
            best_score = similarity;
            best_text = candidate.clone();
        }
    }
    (best_text, best_score)
}

/// Sentence splitter tuned for news prose: terminal punctuation and line
/// breaks end a sentence; very long run-ons are chunked so one paragraph
/// cannot dominate the ratios.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(['.', '!', '?', '…', '。', '？', '！', '\n', '\r']) {
        let part = raw.trim();
        if part.is_empty() {
            continue;
        }
        if part.chars().count() > 600 {
            let chars: Vec<char> = part.chars().collect();
            for chunk in chars.chunks(300) {
                let piece: String = chunk.iter().collect();
                let piece = piece.trim().to_string();
                if !piece.is_empty() {
                    out.push(piece);
                }
            }
        } else {
            out.push(part.to_string());
        }
    }
    out
}

/// Lowercased word tokens with trailing particles removed, so "환율이" and
/// "환율을" count as the same word without a morphological analyzer.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| {
            let token = m.as_str().to_lowercase();
            if token.chars().count() > 1 {
                for josa in JOSA {
                    if let Some(stripped) = token.strip_suffix(josa) {
                        if !stripped.is_empty() {
                            return stripped.to_string();
                        }
                    }
                }
            }
            token
        })
        .collect()
}

fn counter(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts: HashMap<&str, f64> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine_counter(a: &HashMap<&str, f64>, b: &HashMap<&str, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    for (token, weight) in a {
        if let Some(other) = b.get(token) {
            dot += weight * other;
        }
    }
    let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "정부는 오늘 기준금리를 인하했다. 한국은행은 물가 안정세를 근거로 들었다. \
        시장은 금리 인하를 예상해 왔다. 전문가들은 추가 인하 가능성도 거론했다.";

    #[test]
    fn test_supported_summary_scores_high() {
        let summary = "정부가 기준금리를 인하했다. 한국은행은 물가 안정세를 근거로 들었다.";
        let assessment = assess("기준금리 인하", summary, &BODY.repeat(3), 2);
        assert!(assessment.score >= 75, "score was {}", assessment.score);
        assert_eq!(assessment.badge, Badge::Trusted);
        assert!(!assessment.flags.contains(&RiskFlag::LowCrossSource));
    }

    #[test]
    fn test_unsupported_summary_is_flagged() {
        let summary = "유명 배우가 새 드라마에 출연한다. 촬영은 제주에서 진행된다.";
        let assessment = assess("기준금리 인하", summary, &BODY.repeat(3), 1);
        assert!(assessment.flags.contains(&RiskFlag::EvidenceGap));
        assert_eq!(assessment.badge, Badge::Suspect);
    }

    #[test]
    fn test_score_is_always_clamped() {
        // Worst case everything: no evidence, mismatch, sensational, short, lone source.
        let assessment = assess("[충격] 전혀 다른 제목", "완전히 무관한 요약 문장", "짧은 본문", 1);
        assert!((0..=100).contains(&assessment.score));

        // Best case with a large bonus still caps at 100.
        let summary = "정부가 기준금리를 인하했다";
        let assessment = assess("기준금리 인하", summary, &BODY.repeat(3), 10);
        assert!(assessment.score <= 100);
    }

    #[test]
    fn test_badge_is_deterministic() {
        assert_eq!(badge_for(80, &[]), Badge::Trusted);
        assert_eq!(badge_for(80, &[RiskFlag::EvidenceGap]), Badge::Suspect);
        assert_eq!(badge_for(74, &[]), Badge::Caution);
        assert_eq!(badge_for(40, &[RiskFlag::LowEvidence]), Badge::Caution);
        assert_eq!(badge_for(39, &[]), Badge::Suspect);
        // Same inputs, same badge.
        assert_eq!(badge_for(55, &[RiskFlag::ShortContent]), badge_for(55, &[RiskFlag::ShortContent]));
    }

    #[test]
    fn test_cross_source_bonus_and_flag() {
        // Second sentence has no support, keeping the base score below the
        // cap so the bonus is visible.
        let summary = "정부가 기준금리를 인하했다. 내일은 전국에 비가 내린다.";
        let lone = assess("기준금리 인하", summary, &BODY.repeat(3), 1);
        let corroborated = assess("기준금리 인하", summary, &BODY.repeat(3), 3);
        assert!(lone.flags.contains(&RiskFlag::LowCrossSource));
        assert!(!corroborated.flags.contains(&RiskFlag::LowCrossSource));
        assert!(corroborated.score > lone.score);
    }

    #[test]
    fn test_sensational_title_flag() {
        let assessment = assess("[단독] 기준금리 인하", "정부가 기준금리를 인하했다", &BODY.repeat(3), 2);
        assert!(assessment.flags.contains(&RiskFlag::SensationalTitle));
    }

    #[test]
    fn test_short_content_flag() {
        let assessment = assess("기준금리 인하", "정부가 기준금리를 인하했다", "정부가 기준금리를 인하했다", 2);
        assert!(assessment.flags.contains(&RiskFlag::ShortContent));
    }

    #[test]
    fn test_tokenize_strips_particles() {
        assert_eq!(tokenize("서울에서"), vec!["서울"]);
        assert_eq!(tokenize("환율이 급등"), vec!["환율", "급등"]);
        // Single-character tokens are left alone.
        assert_eq!(tokenize("이"), vec!["이"]);
    }

    #[test]
    fn test_split_sentences_chunks_run_ons() {
        let sentences = split_sentences("첫 문장. 둘째 문장!\n셋째");
        assert_eq!(sentences.len(), 3);

        let run_on = "가".repeat(700);
        let chunks = split_sentences(&run_on);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 300));
    }

    #[test]
    fn test_flags_serialize_as_codes() {
        let json = flags_to_json(&[RiskFlag::EvidenceGap, RiskFlag::ShortContent]);
        assert_eq!(json, r#"["EVIDENCE_GAP","SHORT_CONTENT"]"#);
    }
}
