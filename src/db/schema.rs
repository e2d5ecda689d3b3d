use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                source_id TEXT NOT NULL,
                title TEXT,
                source_name TEXT,
                category TEXT,
                url TEXT,
                published_at TEXT,
                fetched_at TEXT,
                summary TEXT,
                content TEXT,
                content_extracted_at TEXT,
                ai_summary TEXT,
                ai_summarized_at TEXT,
                embedding TEXT,
                embedding_at TEXT,
                dup_cluster_id INTEGER,
                quality_score INTEGER,
                risk_flags TEXT,
                badge TEXT,
                verified_at TEXT,
                claimed_at TEXT,
                UNIQUE(provider, source_id)
            );
            CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles (published_at);
            CREATE INDEX IF NOT EXISTS idx_articles_provider ON articles (provider);
            CREATE INDEX IF NOT EXISTS idx_articles_cluster ON articles (dup_cluster_id);
            CREATE INDEX IF NOT EXISTS idx_articles_verified_at ON articles (verified_at);
            CREATE INDEX IF NOT EXISTS idx_articles_category_published ON articles (category, published_at);

            CREATE TABLE IF NOT EXISTS clusters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster_key TEXT NOT NULL UNIQUE,
                category TEXT,
                representative_news_id INTEGER,
                representative_url TEXT,
                cluster_title TEXT,
                cluster_summary TEXT,
                image_url TEXT,
                quality_score INTEGER,
                risk_flags TEXT,
                badge TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_clusters_category ON clusters (category);
            CREATE INDEX IF NOT EXISTS idx_clusters_updated_at ON clusters (updated_at);
            "#,
        )
        .execute(&mut *conn)
        .await?;
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}
