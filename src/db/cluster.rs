use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::article::Article;
use super::core::Database;
use crate::util::now_ts;
use crate::TARGET_DB;

/// One deduplicated story, mirroring the `clusters` table.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Cluster {
    pub id: i64,
    pub cluster_key: String,
    pub category: Option<String>,
    pub representative_news_id: Option<i64>,
    pub representative_url: Option<String>,
    pub cluster_title: Option<String>,
    pub cluster_summary: Option<String>,
    pub image_url: Option<String>,
    pub quality_score: Option<i64>,
    pub risk_flags: Option<String>,
    pub badge: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Cluster {
    fn from_row(row: &SqliteRow) -> Self {
        Cluster {
            id: row.get("id"),
            cluster_key: row.get("cluster_key"),
            category: row.get("category"),
            representative_news_id: row.get("representative_news_id"),
            representative_url: row.get("representative_url"),
            cluster_title: row.get("cluster_title"),
            cluster_summary: row.get("cluster_summary"),
            image_url: row.get("image_url"),
            quality_score: row.get("quality_score"),
            risk_flags: row.get("risk_flags"),
            badge: row.get("badge"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

impl Database {
    /// Upsert a cluster by `cluster_key` and return its id.
    ///
    /// None arguments leave existing values untouched; `updated_at` always
    /// bumps. Two workers inventing the same key concurrently is expected:
    /// the loser's insert hits the unique constraint, is ignored, and the
    /// existing row's id is returned.
    pub async fn upsert_cluster(
        &self,
        cluster_key: &str,
        category: Option<&str>,
        representative_news_id: Option<i64>,
        cluster_title: Option<&str>,
        quality_score: Option<i64>,
        risk_flags_json: Option<&str>,
        badge: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let now = now_ts();

        let updated = sqlx::query(
            r#"
            UPDATE clusters
            SET category = COALESCE(?1, category),
                representative_news_id = COALESCE(?2, representative_news_id),
                cluster_title = COALESCE(?3, cluster_title),
                quality_score = COALESCE(?4, quality_score),
                risk_flags = COALESCE(?5, risk_flags),
                badge = COALESCE(?6, badge),
                updated_at = ?7
            WHERE cluster_key = ?8
            "#,
        )
        .bind(category)
        .bind(representative_news_id)
        .bind(cluster_title)
        .bind(quality_score)
        .bind(risk_flags_json)
        .bind(badge)
        .bind(&now)
        .bind(cluster_key)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 0 {
            // No row yet; insert, tolerating a concurrent creator.
            sqlx::query(
                r#"
                INSERT INTO clusters
                (cluster_key, category, representative_news_id, cluster_title,
                 quality_score, risk_flags, badge, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(cluster_key) DO NOTHING
                "#,
            )
            .bind(cluster_key)
            .bind(category)
            .bind(representative_news_id)
            .bind(cluster_title)
            .bind(quality_score)
            .bind(risk_flags_json)
            .bind(badge)
            .bind(&now)
            .execute(self.pool())
            .await?;
        }

        self.cluster_id_by_key(cluster_key).await
    }

    pub async fn cluster_id_by_key(&self, cluster_key: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM clusters WHERE cluster_key = ?1")
            .bind(cluster_key)
            .fetch_one(self.pool())
            .await
    }

    /// The cluster an article represents, if any.
    pub async fn cluster_id_by_representative(
        &self,
        news_id: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM clusters WHERE representative_news_id = ?1 LIMIT 1")
            .bind(news_id)
            .fetch_optional(self.pool())
            .await
    }

    pub async fn get_cluster(&self, cluster_id: i64) -> Result<Option<Cluster>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM clusters WHERE id = ?1")
            .bind(cluster_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(Cluster::from_row))
    }

    /// Bump `updated_at` when a member joins without any field changes.
    pub async fn touch_cluster(&self, cluster_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE clusters SET updated_at = ?1 WHERE id = ?2")
            .bind(now_ts())
            .bind(cluster_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_representative(
        &self,
        cluster_id: i64,
        news_id: i64,
        url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE clusters
            SET representative_news_id = ?1,
                representative_url = COALESCE(?2, representative_url),
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(news_id)
        .bind(url)
        .bind(now_ts())
        .bind(cluster_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Write the synthesized title/summary onto the cluster row. Idempotent:
    /// re-running overwrites the same three fields.
    pub async fn set_cluster_summary(
        &self,
        cluster_id: i64,
        cluster_title: &str,
        cluster_summary: &str,
        representative_url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE clusters
            SET cluster_title = ?1,
                cluster_summary = ?2,
                representative_url = COALESCE(?3, representative_url),
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(cluster_title)
        .bind(cluster_summary)
        .bind(representative_url)
        .bind(now_ts())
        .bind(cluster_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_cluster_quality(
        &self,
        cluster_id: i64,
        quality_score: i64,
        risk_flags_json: &str,
        badge: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE clusters
            SET quality_score = ?1,
                risk_flags = ?2,
                badge = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(quality_score)
        .bind(risk_flags_json)
        .bind(badge)
        .bind(now_ts())
        .bind(cluster_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn cluster_members(
        &self,
        cluster_id: i64,
        limit: i64,
    ) -> Result<Vec<Article>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM articles
            WHERE dup_cluster_id = ?1
            ORDER BY published_at DESC
            LIMIT ?2
            "#,
        )
        .bind(cluster_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(Article::from_row).collect())
    }

    /// Distinct providers contributing to a cluster, the input to the
    /// cross-source corroboration bonus.
    pub async fn distinct_provider_count(&self, cluster_id: i64) -> Result<i64, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT provider) FROM articles WHERE dup_cluster_id = ?1",
        )
        .bind(cluster_id)
        .fetch_one(self.pool())
        .await?;
        debug!(target: TARGET_DB, "Cluster {} spans {} providers", cluster_id, count);
        Ok(count)
    }

    /// Read API for downstream consumers: most recently touched clusters,
    /// optionally restricted to a category.
    pub async fn recent_clusters(
        &self,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Cluster>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM clusters
            WHERE (?1 IS NULL OR category = ?1)
            ORDER BY updated_at DESC
            LIMIT ?2
            "#,
        )
        .bind(category)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(Cluster::from_row).collect())
    }
}
