use rand::Rng;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument};

use super::core::{Database, DbLockErrorExt};
use crate::providers::types::NormalizedArticle;
use crate::util::format_ts;
use crate::TARGET_DB;

/// One ingested news item, mirroring the `articles` table.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Article {
    pub id: i64,
    pub provider: String,
    pub source_id: String,
    pub title: Option<String>,
    pub source_name: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
    pub fetched_at: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub content_extracted_at: Option<String>,
    pub ai_summary: Option<String>,
    pub ai_summarized_at: Option<String>,
    pub embedding: Option<String>,
    pub embedding_at: Option<String>,
    pub dup_cluster_id: Option<i64>,
    pub quality_score: Option<i64>,
    pub risk_flags: Option<String>,
    pub badge: Option<String>,
    pub verified_at: Option<String>,
    pub claimed_at: Option<String>,
}

impl Article {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Article {
            id: row.get("id"),
            provider: row.get("provider"),
            source_id: row.get("source_id"),
            title: row.get("title"),
            source_name: row.get("source_name"),
            category: row.get("category"),
            url: row.get("url"),
            published_at: row.get("published_at"),
            fetched_at: row.get("fetched_at"),
            summary: row.get("summary"),
            content: row.get("content"),
            content_extracted_at: row.get("content_extracted_at"),
            ai_summary: row.get("ai_summary"),
            ai_summarized_at: row.get("ai_summarized_at"),
            embedding: row.get("embedding"),
            embedding_at: row.get("embedding_at"),
            dup_cluster_id: row.get("dup_cluster_id"),
            quality_score: row.get("quality_score"),
            risk_flags: row.get("risk_flags"),
            badge: row.get("badge"),
            verified_at: row.get("verified_at"),
            claimed_at: row.get("claimed_at"),
        }
    }

    /// The text a quality check should run against: full body when extracted,
    /// otherwise the model summary.
    pub fn assessable_text(&self) -> Option<&str> {
        match self.content.as_deref() {
            Some(c) if !c.trim().is_empty() => Some(c),
            _ => match self.ai_summary.as_deref() {
                Some(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UpsertOutcome {
    pub inserted: bool,
    pub id: i64,
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

impl Database {
    /// Insert or update an article keyed on (provider, source_id).
    ///
    /// Re-ingesting an item a provider already delivered refreshes its
    /// metadata instead of creating a second row. Returns whether a new row
    /// was created, so the caller can feed only fresh ids into the pipeline.
    #[instrument(target = "db_query", level = "info", skip(self, article))]
    pub async fn upsert_article(
        &self,
        article: &NormalizedArticle,
        fetched_at: &str,
    ) -> Result<UpsertOutcome, sqlx::Error> {
        let published_at = article.published_at.as_ref().map(format_ts);

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            let result = sqlx::query(
                r#"
                INSERT INTO articles
                (provider, source_id, title, summary, url, source_name, category, published_at, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(provider, source_id) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(article.provider)
            .bind(&article.external_id)
            .bind(non_empty(&article.title))
            .bind(non_empty(&article.summary))
            .bind(non_empty(&article.url))
            .bind(non_empty(&article.source_name))
            .bind(non_empty(&article.category))
            .bind(&published_at)
            .bind(fetched_at)
            .fetch_optional(self.pool())
            .await;

            match result {
                Ok(Some(row)) => {
                    let id: i64 = row.get("id");
                    debug!(target: TARGET_DB, "Article inserted: {} with id {}", article.external_id, id);
                    return Ok(UpsertOutcome { inserted: true, id });
                }
                Ok(None) => {
                    // Conflict: the row exists, refresh it in place.
                    sqlx::query(
                        r#"
                        UPDATE articles
                        SET fetched_at   = ?1,
                            title        = COALESCE(?2, title),
                            summary      = COALESCE(?3, summary),
                            url          = COALESCE(?4, url),
                            source_name  = COALESCE(?5, source_name),
                            category     = COALESCE(?6, category),
                            published_at = COALESCE(?7, published_at)
                        WHERE provider = ?8 AND source_id = ?9
                        "#,
                    )
                    .bind(fetched_at)
                    .bind(non_empty(&article.title))
                    .bind(non_empty(&article.summary))
                    .bind(non_empty(&article.url))
                    .bind(non_empty(&article.source_name))
                    .bind(non_empty(&article.category))
                    .bind(&published_at)
                    .bind(article.provider)
                    .bind(&article.external_id)
                    .execute(self.pool())
                    .await?;

                    let id = self
                        .article_id_by_source(article.provider, &article.external_id)
                        .await?;
                    return Ok(UpsertOutcome {
                        inserted: false,
                        id,
                    });
                }
                Err(err) => {
                    if err.is_database_lock_error() {
                        info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}: {}", backoff, attempt, max_retries, article.external_id);
                        sleep(Duration::from_millis(backoff)).await;
                        backoff = backoff.saturating_mul(2); // exponential backoff
                        if attempt == max_retries {
                            // Introduce some randomness to avoid the "thundering herd problem"
                            let random_jitter = rand::rng().random_range(0..200);
                            backoff += random_jitter;
                            sleep(Duration::from_millis(backoff)).await;
                        }
                    } else {
                        error!(target: TARGET_DB, "Failed to upsert article: {}", err);
                        return Err(err);
                    }
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for upserting article".into(),
        ))
    }

    pub async fn article_id_by_source(
        &self,
        provider: &str,
        source_id: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM articles WHERE provider = ?1 AND source_id = ?2 LIMIT 1")
            .bind(provider)
            .bind(source_id)
            .fetch_one(self.pool())
            .await
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?1")
            .bind(article_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(Article::from_row))
    }

    /// Stamp a content-extraction attempt so a failing URL is not retried
    /// more than once per backoff window.
    pub async fn mark_content_attempt(
        &self,
        article_id: i64,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE articles SET content_extracted_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(article_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn save_content(
        &self,
        article_id: i64,
        content: &str,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE articles
            SET content = ?1,
                content_extracted_at = ?2,
                claimed_at = NULL
            WHERE id = ?3
            "#,
        )
        .bind(content)
        .bind(now)
        .bind(article_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn save_ai_summary(
        &self,
        article_id: i64,
        ai_summary: &str,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE articles
            SET ai_summary = ?1,
                ai_summarized_at = ?2,
                claimed_at = NULL
            WHERE id = ?3
            "#,
        )
        .bind(ai_summary)
        .bind(now)
        .bind(article_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn save_embedding(
        &self,
        article_id: i64,
        embedding_json: &str,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE articles
            SET embedding = ?1,
                embedding_at = ?2,
                claimed_at = NULL
            WHERE id = ?3
            "#,
        )
        .bind(embedding_json)
        .bind(now)
        .bind(article_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fill the cross-source summary slot on the representative article.
    pub async fn save_summary(&self, article_id: i64, summary: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE articles
            SET summary = ?1,
                claimed_at = NULL
            WHERE id = ?2
            "#,
        )
        .bind(summary)
        .bind(article_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Stamp the result of a quality pass on one article row.
    pub async fn update_quality(
        &self,
        article_id: i64,
        cluster_id: i64,
        quality_score: i64,
        risk_flags_json: &str,
        badge: &str,
        verified_at: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE articles
            SET dup_cluster_id = ?1,
                quality_score = ?2,
                risk_flags = ?3,
                badge = ?4,
                verified_at = ?5,
                claimed_at = NULL
            WHERE id = ?6
            "#,
        )
        .bind(cluster_id)
        .bind(quality_score)
        .bind(risk_flags_json)
        .bind(badge)
        .bind(verified_at)
        .bind(article_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_article_cluster(
        &self,
        article_id: i64,
        cluster_id: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE articles SET dup_cluster_id = ?1 WHERE id = ?2")
            .bind(cluster_id)
            .bind(article_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Candidate pool for similarity comparison: same category, embedded,
    /// published within the window around the anchor timestamp.
    pub async fn embedding_candidates(
        &self,
        category: &str,
        published_at: &str,
        window_hours: i64,
        limit: i64,
    ) -> Result<Vec<Article>, sqlx::Error> {
        let before = format!("-{} hours", window_hours);
        let after = format!("+{} hours", window_hours);
        let rows = sqlx::query(
            r#"
            SELECT * FROM articles
            WHERE category = ?1
              AND embedding IS NOT NULL AND embedding <> '' AND embedding <> '[]'
              AND published_at IS NOT NULL
              AND datetime(published_at) >= datetime(?2, ?3)
              AND datetime(published_at) <= datetime(?2, ?4)
            ORDER BY published_at DESC
            LIMIT ?5
            "#,
        )
        .bind(category)
        .bind(published_at)
        .bind(before)
        .bind(after)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(Article::from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::now_ts;
    use chrono::Utc;

    async fn test_db(name: &str) -> Database {
        let path = std::env::temp_dir().join(format!(
            "veritas-article-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Database::new(path.to_str().expect("temp path is utf-8"))
            .await
            .expect("test database")
    }

    fn sample() -> NormalizedArticle {
        NormalizedArticle {
            external_id: "abc123".to_string(),
            title: "금리 인하 발표".to_string(),
            summary: "요약".to_string(),
            url: "https://news.example.com/1".to_string(),
            image_url: None,
            published_at: Some(Utc::now()),
            source_name: "Example Daily".to_string(),
            provider: "rss",
            category: "economy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_source() {
        let db = test_db("idempotent").await;
        let now = now_ts();

        let first = db.upsert_article(&sample(), &now).await.expect("insert");
        assert!(first.inserted);

        let mut refreshed = sample();
        refreshed.title = "금리 인하 공식 발표".to_string();
        let second = db.upsert_article(&refreshed, &now).await.expect("update");
        assert!(!second.inserted);
        assert_eq!(first.id, second.id);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(db.pool())
            .await
            .expect("count");
        assert_eq!(count, 1);

        let row = db.get_article(first.id).await.expect("get").expect("exists");
        assert_eq!(row.title.as_deref(), Some("금리 인하 공식 발표"));
    }

    #[tokio::test]
    async fn test_same_source_id_different_provider_is_a_new_row() {
        let db = test_db("provider-split").await;
        let now = now_ts();

        let first = db.upsert_article(&sample(), &now).await.expect("insert");
        let mut other = sample();
        other.provider = "naver";
        let second = db.upsert_article(&other, &now).await.expect("insert");
        assert!(second.inserted);
        assert_ne!(first.id, second.id);
    }
}
