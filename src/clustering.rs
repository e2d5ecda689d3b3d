use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::db::{Article, Database};
use crate::util::{normalize_whitespace, parse_ts};

/// Candidates kept after similarity ranking.
pub const TOP_K: usize = 20;

/// Serialize an embedding as the JSON array text stored in the database.
pub fn encode_embedding(vector: &[f32]) -> String {
    serde_json::to_string(vector).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a stored embedding. A malformed value is an error the caller
/// turns into a skip, never a crash.
pub fn decode_embedding(json: &str) -> Result<Vec<f32>> {
    let vector: Vec<f32> =
        serde_json::from_str(json).map_err(|e| anyhow!("invalid embedding json: {}", e))?;
    if vector.is_empty() {
        return Err(anyhow!("empty embedding"));
    }
    Ok(vector)
}

/// Calculate cosine similarity directly between two vectors
pub fn cosine_similarity(vec1: &[f32], vec2: &[f32]) -> Result<f32> {
    if vec1.len() != vec2.len() {
        return Err(anyhow!(
            "Vector dimensions don't match: {} vs {}",
            vec1.len(),
            vec2.len()
        ));
    }

    let mag1: f32 = vec1.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag2: f32 = vec2.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag1 < 0.001 || mag2 < 0.001 {
        return Err(anyhow!("Zero magnitude vector detected"));
    }

    let dot_product: f32 = vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum();
    Ok(dot_product / (mag1 * mag2))
}

static BRACKETED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").expect("valid bracket regex"));
static NON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9a-z가-힣\s]").expect("valid word regex"));

/// Reduce a headline to a comparison fingerprint: lowercase, no bracketed
/// tags, no punctuation, collapsed whitespace. Titles that normalize below
/// ten characters are too generic to fingerprint and yield an empty string.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let without_brackets = BRACKETED_RE.replace_all(&lowered, " ");
    let word_only = NON_WORD_RE.replace_all(&without_brackets, " ");
    let collapsed = normalize_whitespace(&word_only);
    if collapsed.chars().count() < 10 {
        return String::new();
    }
    collapsed.chars().take(120).collect()
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic cluster identity: category, a coarse time bucket (the UTC
/// publication day), and the title fingerprint. Two workers racing on the
/// same story compute the same key and collide on the unique constraint
/// instead of creating twin clusters.
pub fn cluster_key(article: &Article) -> String {
    let category = article.category.as_deref().unwrap_or("");
    let day = article
        .published_at
        .as_deref()
        .and_then(parse_ts)
        .map(|d| d.date_naive().to_string())
        .unwrap_or_default();

    let norm = normalize_title(article.title.as_deref().unwrap_or(""));
    let fingerprint = if norm.is_empty() {
        format!(
            "{}|{}",
            article.provider,
            article.url.as_deref().unwrap_or(&article.source_id)
        )
    } else {
        norm
    };

    sha256_hex(&format!("{}|{}|{}", category, day, fingerprint))
}

pub struct ScoredCandidate {
    pub article: Article,
    pub similarity: f32,
}

/// Rank the candidate pool by similarity to the query embedding, best first.
/// Candidates with malformed embeddings are skipped.
pub async fn top_candidates(
    db: &Database,
    config: &ClusterConfig,
    article: &Article,
    query: &[f32],
) -> Result<Vec<ScoredCandidate>> {
    let (category, published_at) = match (&article.category, &article.published_at) {
        (Some(category), Some(published_at)) => (category.as_str(), published_at.as_str()),
        _ => return Ok(Vec::new()),
    };

    let pool = db
        .embedding_candidates(
            category,
            published_at,
            config.window_hours,
            config.candidate_limit,
        )
        .await?;

    let mut scored = Vec::new();
    for candidate in pool {
        if candidate.id == article.id {
            continue;
        }
        let vector = match candidate.embedding.as_deref().map(decode_embedding) {
            Some(Ok(vector)) => vector,
            _ => continue,
        };
        match cosine_similarity(query, &vector) {
            Ok(similarity) => scored.push(ScoredCandidate {
                article: candidate,
                similarity,
            }),
            Err(err) => {
                debug!("Skipping candidate {}: {}", candidate.id, err);
            }
        }
    }

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(TOP_K);
    Ok(scored)
}

/// Assign an article to a cluster: join the best candidate's cluster when
/// the similarity clears the threshold, otherwise create one.
///
/// When the winning candidate has no cluster yet (it was scored before any
/// neighbor existed), a cluster is created from the candidate and both
/// articles attach to it.
pub async fn assign_to_cluster(
    db: &Database,
    config: &ClusterConfig,
    article: &Article,
    embedding: &[f32],
) -> Result<i64> {
    let candidates = top_candidates(db, config, article, embedding).await?;

    if let Some(best) = candidates.first() {
        if f64::from(best.similarity) >= config.similarity_threshold {
            if let Some(cluster_id) = best.article.dup_cluster_id {
                info!(
                    "Assigning article {} to existing cluster {} (similarity: {:.4})",
                    article.id, cluster_id, best.similarity
                );
                db.set_article_cluster(article.id, cluster_id).await?;
                db.touch_cluster(cluster_id).await?;
                return Ok(cluster_id);
            }

            info!(
                "Creating cluster from matched pair {} / {} (similarity: {:.4})",
                article.id, best.article.id, best.similarity
            );
            let key = cluster_key(&best.article);
            let cluster_id = db
                .upsert_cluster(
                    &key,
                    best.article.category.as_deref(),
                    Some(best.article.id),
                    best.article.title.as_deref(),
                    None,
                    None,
                    None,
                )
                .await?;
            db.set_article_cluster(best.article.id, cluster_id).await?;
            db.set_article_cluster(article.id, cluster_id).await?;
            return Ok(cluster_id);
        }
    }

    info!(
        "Creating new cluster for article {}: no candidate above threshold",
        article.id
    );
    let key = cluster_key(article);
    let cluster_id = db
        .upsert_cluster(
            &key,
            article.category.as_deref(),
            Some(article.id),
            article.title.as_deref(),
            None,
            None,
            None,
        )
        .await?;
    db.set_article_cluster(article.id, cluster_id).await?;
    Ok(cluster_id)
}

/// The cluster member that supplies the canonical title/summary/URL:
/// highest quality score, ties broken by earliest publication, then id.
pub fn pick_representative(members: &[Article]) -> Option<&Article> {
    members.iter().min_by(|a, b| {
        let score_a = a.quality_score.unwrap_or(-1);
        let score_b = b.quality_score.unwrap_or(-1);
        score_b
            .cmp(&score_a)
            .then_with(|| match (&a.published_at, &b.published_at) {
                (Some(pa), Some(pb)) => pa.cmp(pb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id))
    })
}

/// Re-elect the representative after membership or scores changed.
pub async fn refresh_representative(db: &Database, cluster_id: i64) -> Result<()> {
    let members = db.cluster_members(cluster_id, 200).await?;
    if let Some(representative) = pick_representative(&members) {
        db.set_representative(cluster_id, representative.id, representative.url.as_deref())
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::NormalizedArticle;
    use crate::util::{format_ts, now_ts};
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_cosine_similarity_basics() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        assert!((cosine_similarity(&a, &b).expect("same") - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).expect("orthogonal").abs() < 1e-6);
        assert!(cosine_similarity(&a, &[1.0, 0.0, 0.0]).is_err());
        assert!(cosine_similarity(&a, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("[단독] 금리 인하 \"전격\" 발표…시장 반응은? (종합)"),
            "금리 인하 전격 발표 시장 반응은"
        );
        // Too short to fingerprint.
        assert_eq!(normalize_title("속보"), "");
    }

    #[test]
    fn test_cluster_key_is_deterministic_and_scoped() {
        let mut a = Article {
            id: 1,
            provider: "naver".to_string(),
            source_id: "s1".to_string(),
            title: Some("금리 인하 전격 발표 시장 반응".to_string()),
            category: Some("economy".to_string()),
            published_at: Some("2026-08-05T09:00:00.000Z".to_string()),
            ..Article::default()
        };
        let key_one = cluster_key(&a);
        let key_two = cluster_key(&a);
        assert_eq!(key_one, key_two);

        a.category = Some("politics".to_string());
        assert_ne!(cluster_key(&a), key_one);
    }

    #[test]
    fn test_representative_by_score_then_earliest() {
        let early = format_ts(&(Utc::now() - ChronoDuration::hours(5)));
        let late = format_ts(&(Utc::now() - ChronoDuration::hours(1)));
        let members = vec![
            Article {
                id: 1,
                quality_score: Some(70),
                published_at: Some(late.clone()),
                ..Article::default()
            },
            Article {
                id: 2,
                quality_score: Some(90),
                published_at: Some(late.clone()),
                ..Article::default()
            },
            Article {
                id: 3,
                quality_score: Some(90),
                published_at: Some(early),
                ..Article::default()
            },
        ];
        // Highest score wins, and among the tied the earliest published.
        assert_eq!(pick_representative(&members).expect("some").id, 3);
    }

    async fn test_db(name: &str) -> Database {
        let path = std::env::temp_dir().join(format!(
            "veritas-clustering-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Database::new(path.to_str().expect("temp path is utf-8"))
            .await
            .expect("test database")
    }

    async fn seeded(db: &Database, source_id: &str, title: &str, embedding: &[f32]) -> Article {
        let now = now_ts();
        let normalized = NormalizedArticle {
            external_id: source_id.to_string(),
            title: title.to_string(),
            summary: String::new(),
            url: format!("https://news.example.com/{}", source_id),
            image_url: None,
            published_at: Some(Utc::now()),
            source_name: "Example Daily".to_string(),
            provider: "rss",
            category: "economy".to_string(),
        };
        let outcome = db.upsert_article(&normalized, &now).await.expect("upsert");
        db.save_embedding(outcome.id, &encode_embedding(embedding), &now)
            .await
            .expect("embedding");
        db.get_article(outcome.id)
            .await
            .expect("get")
            .expect("exists")
    }

    #[tokio::test]
    async fn test_threshold_gates_cluster_membership() {
        let db = test_db("threshold").await;
        let config = ClusterConfig {
            similarity_threshold: 0.85,
            window_hours: 48,
            candidate_limit: 200,
        };

        // Unit vectors: cosine(a, b) ~= 0.92, cosine(a, c) = 0.0.
        let a = seeded(&db, "a", "환율 급등 당국 개입 시사했다", &[1.0, 0.0]).await;
        let a_cluster = assign_to_cluster(&db, &config, &a, &[1.0, 0.0])
            .await
            .expect("assign a");

        let b = seeded(&db, "b", "환율 급등에 당국이 개입", &[0.92, 0.3919]).await;
        let b_cluster = assign_to_cluster(&db, &config, &b, &[0.92, 0.3919])
            .await
            .expect("assign b");
        assert_eq!(a_cluster, b_cluster);

        let c = seeded(&db, "c", "프로야구 순위 경쟁 본격화", &[0.0, 1.0]).await;
        let c_cluster = assign_to_cluster(&db, &config, &c, &[0.0, 1.0])
            .await
            .expect("assign c");
        assert_ne!(a_cluster, c_cluster);
    }
}
