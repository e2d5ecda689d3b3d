use tracing::debug;

use super::article::Article;
use super::core::Database;
use crate::util::now_ts;
use crate::TARGET_DB;

/// The claimable pipeline stages. Each stage owns one precondition query;
/// a row moves through stages as its columns fill in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Content,
    AiSummary,
    Embedding,
    Quality,
    RepresentativeSummary,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Content,
        Stage::AiSummary,
        Stage::Embedding,
        Stage::Quality,
        Stage::RepresentativeSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Content => "content",
            Stage::AiSummary => "ai-summary",
            Stage::Embedding => "embedding",
            Stage::Quality => "quality",
            Stage::RepresentativeSummary => "representative-summary",
        }
    }
}

// SQLite has no FOR UPDATE SKIP LOCKED, so each claim is a lease: one UPDATE
// stamps `claimed_at` on the selected rows and returns them. SQLite runs the
// whole statement under its write lock, so two workers can never be handed
// the same row while a lease is fresh. Completing a stage clears the lease;
// a crashed worker's lease simply expires.
//
// Bind order for every variant: ?1 = now, ?2 = lease window modifier,
// ?3 = batch limit.
const CLAIM_CONTENT: &str = r#"
    UPDATE articles SET claimed_at = ?1
    WHERE id IN (
        SELECT id FROM articles
        WHERE url IS NOT NULL AND url <> ''
          AND (content IS NULL OR content = '')
          AND (content_extracted_at IS NULL
               OR datetime(content_extracted_at) < datetime('now', '-1 hour'))
          AND (claimed_at IS NULL OR datetime(claimed_at) < datetime('now', ?2))
        ORDER BY fetched_at DESC
        LIMIT ?3
    )
    RETURNING *
"#;

const CLAIM_AI_SUMMARY: &str = r#"
    UPDATE articles SET claimed_at = ?1
    WHERE id IN (
        SELECT id FROM articles
        WHERE (content IS NOT NULL AND trim(content) <> '')
          AND (ai_summary IS NULL OR trim(ai_summary) = '')
          AND (claimed_at IS NULL OR datetime(claimed_at) < datetime('now', ?2))
        ORDER BY published_at DESC
        LIMIT ?3
    )
    RETURNING *
"#;

const CLAIM_EMBEDDING: &str = r#"
    UPDATE articles SET claimed_at = ?1
    WHERE id IN (
        SELECT id FROM articles
        WHERE (
              (ai_summary IS NOT NULL AND trim(ai_summary) <> '')
           OR (content IS NOT NULL AND trim(content) <> '')
          )
          AND (embedding IS NULL OR embedding = '' OR embedding = '[]')
          AND (claimed_at IS NULL OR datetime(claimed_at) < datetime('now', ?2))
        ORDER BY published_at DESC
        LIMIT ?3
    )
    RETURNING *
"#;

const CLAIM_QUALITY: &str = r#"
    UPDATE articles SET claimed_at = ?1
    WHERE id IN (
        SELECT id FROM articles
        WHERE (
              (ai_summary IS NOT NULL AND trim(ai_summary) <> '')
           OR (content IS NOT NULL AND trim(content) <> '')
          )
          AND (embedding IS NOT NULL AND embedding <> '' AND embedding <> '[]')
          AND (dup_cluster_id IS NULL OR verified_at IS NULL OR quality_score IS NULL)
          AND (claimed_at IS NULL OR datetime(claimed_at) < datetime('now', ?2))
        ORDER BY published_at DESC
        LIMIT ?3
    )
    RETURNING *
"#;

const CLAIM_REPRESENTATIVE_SUMMARY: &str = r#"
    UPDATE articles SET claimed_at = ?1
    WHERE id IN (
        SELECT n.id FROM articles n
        JOIN clusters c ON c.representative_news_id = n.id
        WHERE (n.summary IS NULL OR trim(n.summary) = '')
          AND (n.claimed_at IS NULL OR datetime(n.claimed_at) < datetime('now', ?2))
        ORDER BY c.updated_at DESC
        LIMIT ?3
    )
    RETURNING *
"#;

impl Database {
    /// Atomically claim up to `limit` rows for one pipeline stage.
    ///
    /// Rows claimed less than `lease_secs` ago by any worker are invisible;
    /// everything returned here is owned by the caller until its lease
    /// expires or the stage's completion stamp clears it.
    pub async fn claim_batch(
        &self,
        stage: Stage,
        limit: i64,
        lease_secs: i64,
    ) -> Result<Vec<Article>, sqlx::Error> {
        let now = now_ts();
        let lease = format!("-{} seconds", lease_secs);
        let sql = match stage {
            Stage::Content => CLAIM_CONTENT,
            Stage::AiSummary => CLAIM_AI_SUMMARY,
            Stage::Embedding => CLAIM_EMBEDDING,
            Stage::Quality => CLAIM_QUALITY,
            Stage::RepresentativeSummary => CLAIM_REPRESENTATIVE_SUMMARY,
        };

        let rows = sqlx::query(sql)
            .bind(&now)
            .bind(&lease)
            .bind(limit)
            .fetch_all(self.pool())
            .await?;

        debug!(target: TARGET_DB, "Claimed {} rows for stage {}", rows.len(), stage.as_str());
        Ok(rows.iter().map(Article::from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::NormalizedArticle;
    use crate::util::now_ts;
    use chrono::Utc;
    use std::collections::HashSet;

    async fn test_db(name: &str) -> Database {
        let path = std::env::temp_dir().join(format!(
            "veritas-claim-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Database::new(path.to_str().expect("temp path is utf-8"))
            .await
            .expect("test database")
    }

    fn sample(source_id: &str) -> NormalizedArticle {
        NormalizedArticle {
            external_id: source_id.to_string(),
            title: format!("headline {}", source_id),
            summary: String::new(),
            url: format!("https://news.example.com/{}", source_id),
            image_url: None,
            published_at: Some(Utc::now()),
            source_name: "Example Daily".to_string(),
            provider: "rss",
            category: "economy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_content_claim_lifecycle() {
        let db = test_db("lifecycle").await;
        let now = now_ts();
        let outcome = db.upsert_article(&sample("abc"), &now).await.expect("upsert");
        assert!(outcome.inserted);

        let claimed = db.claim_batch(Stage::Content, 10, 600).await.expect("claim");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, outcome.id);

        // The lease hides the row from a second claim.
        let again = db.claim_batch(Stage::Content, 10, 600).await.expect("claim");
        assert!(again.is_empty());

        // Completing the stage makes the precondition false for good.
        db.save_content(outcome.id, &"국".repeat(300), &now)
            .await
            .expect("save content");
        let after = db.claim_batch(Stage::Content, 10, 600).await.expect("claim");
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_content_backoff_window() {
        let db = test_db("backoff").await;
        let now = now_ts();
        let outcome = db.upsert_article(&sample("retry"), &now).await.expect("upsert");

        // A fresh failed attempt blocks re-claiming for an hour.
        db.mark_content_attempt(outcome.id, &now).await.expect("mark");
        let claimed = db.claim_batch(Stage::Content, 10, 600).await.expect("claim");
        assert!(claimed.is_empty());

        // Once the attempt is old enough the row comes back.
        let stale = crate::util::format_ts(&(Utc::now() - chrono::Duration::hours(2)));
        sqlx::query("UPDATE articles SET content_extracted_at = ?1 WHERE id = ?2")
            .bind(&stale)
            .bind(outcome.id)
            .execute(db.pool())
            .await
            .expect("age the attempt");
        let claimed = db.claim_batch(Stage::Content, 10, 600).await.expect("claim");
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_overlap() {
        let db = test_db("concurrent").await;
        let now = now_ts();
        for i in 0..10 {
            db.upsert_article(&sample(&format!("row-{}", i)), &now)
                .await
                .expect("upsert");
        }

        let db_a = db.clone();
        let db_b = db.clone();
        let a = tokio::spawn(async move { db_a.claim_batch(Stage::Content, 10, 600).await });
        let b = tokio::spawn(async move { db_b.claim_batch(Stage::Content, 10, 600).await });
        let claimed_a = a.await.expect("join").expect("claim a");
        let claimed_b = b.await.expect("join").expect("claim b");

        let ids_a: HashSet<i64> = claimed_a.iter().map(|r| r.id).collect();
        let ids_b: HashSet<i64> = claimed_b.iter().map(|r| r.id).collect();
        assert!(ids_a.is_disjoint(&ids_b));
        assert_eq!(ids_a.len() + ids_b.len(), 10);
    }

    #[tokio::test]
    async fn test_embedding_stage_preconditions() {
        let db = test_db("embedding").await;
        let now = now_ts();
        let with_content = db.upsert_article(&sample("has-content"), &now).await.expect("upsert");
        let bare = db.upsert_article(&sample("bare"), &now).await.expect("upsert");

        db.save_content(with_content.id, &"국".repeat(300), &now)
            .await
            .expect("save content");

        let claimed = db.claim_batch(Stage::Embedding, 10, 600).await.expect("claim");
        let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
        assert!(ids.contains(&with_content.id));
        assert!(!ids.contains(&bare.id));

        db.save_embedding(with_content.id, "[0.1,0.2]", &now)
            .await
            .expect("save embedding");
        let after = db.claim_batch(Stage::Embedding, 10, 600).await.expect("claim");
        assert!(after.is_empty());
    }
}
