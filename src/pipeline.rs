use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::ai::{parse_title_and_summary, Embedder, SummaryService};
use crate::clustering::{
    assign_to_cluster, decode_embedding, encode_embedding, refresh_representative,
};
use crate::config::PipelineConfig;
use crate::db::{Article, Database, Stage};
use crate::extract::ExtractorRegistry;
use crate::prompts;
use crate::providers::keywords::{build_query, CATEGORIES};
use crate::providers::Aggregator;
use crate::quality::{aggregate_score, assess, badge_for, flags_to_json, RiskFlag};
use crate::util::{now_ts, truncate_chars};

/// Embedding input is capped so one long body cannot blow the token limit.
const EMBED_BODY_CHARS: usize = 1200;

/// The batch pipeline: every stage is an independent, claimable pass, and
/// each row commits on its own, so one bad article never takes its batch
/// down with it.
pub struct Pipeline {
    db: &'static Database,
    registry: ExtractorRegistry,
    summarizer: SummaryService,
    embedder: Embedder,
    config: PipelineConfig,
}

impl Pipeline {
    pub async fn from_env() -> Self {
        Pipeline {
            db: Database::instance().await,
            registry: ExtractorRegistry::standard(),
            summarizer: SummaryService::from_env(),
            embedder: Embedder::from_env(),
            config: PipelineConfig::from_env(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one batch of one stage; the external scheduling contract.
    /// Returns how many rows completed the stage.
    pub async fn run_stage(&self, stage: Stage, limit: i64) -> Result<usize> {
        match stage {
            Stage::Content => self.process_content(limit).await,
            Stage::AiSummary => self.process_ai_summaries(limit).await,
            Stage::Embedding => self.process_embeddings(limit).await,
            Stage::Quality => self.process_quality(limit).await,
            Stage::RepresentativeSummary => self.process_representative_summaries(limit).await,
        }
    }

    /// Fill empty bodies through the extraction chain.
    async fn process_content(&self, limit: i64) -> Result<usize> {
        let batch = self
            .db
            .claim_batch(Stage::Content, limit, self.config.claim_lease_secs)
            .await?;

        let mut processed = 0;
        for article in batch {
            let url = match article.url.as_deref() {
                Some(url) if !url.trim().is_empty() => url,
                _ => continue,
            };

            let now = now_ts();
            // Stamp the attempt first: a crash mid-extraction still honors
            // the retry backoff.
            if let Err(err) = self.db.mark_content_attempt(article.id, &now).await {
                error!("Failed to mark extraction attempt for {}: {}", article.id, err);
                continue;
            }

            let outcome = self.registry.extract(url).await;
            match outcome.content {
                Some(content) if outcome.ok => {
                    match self.db.save_content(article.id, &content, &now).await {
                        Ok(()) => {
                            info!(
                                "Extracted {} chars for article {} via {}",
                                content.chars().count(),
                                article.id,
                                outcome.extractor
                            );
                            processed += 1;
                        }
                        Err(err) => error!("Failed to save content for {}: {}", article.id, err),
                    }
                }
                _ => {
                    debug!(
                        "Extraction failed for article {} ({}): {:?}",
                        article.id, outcome.extractor, outcome.error
                    );
                }
            }
        }

        Ok(processed)
    }

    /// Generate model summaries for extracted bodies.
    async fn process_ai_summaries(&self, limit: i64) -> Result<usize> {
        let batch = self
            .db
            .claim_batch(Stage::AiSummary, limit, self.config.claim_lease_secs)
            .await?;

        let mut processed = 0;
        for article in batch {
            let content = match article.content.as_deref() {
                Some(content) if !content.trim().is_empty() => content,
                _ => continue,
            };

            let prompt =
                prompts::article_summary(article.title.as_deref().unwrap_or(""), content);
            let Some(summary) = self.summarizer.generate(&prompt).await else {
                // Lease expiry hands the row back to a later pass.
                continue;
            };

            let now = now_ts();
            match self.db.save_ai_summary(article.id, summary.trim(), &now).await {
                Ok(()) => processed += 1,
                Err(err) => error!("Failed to save summary for {}: {}", article.id, err),
            }
        }

        Ok(processed)
    }

    /// Fill embeddings: model summary when available, else title plus the
    /// top of the body.
    async fn process_embeddings(&self, limit: i64) -> Result<usize> {
        let batch = self
            .db
            .claim_batch(Stage::Embedding, limit, self.config.claim_lease_secs)
            .await?;

        let mut processed = 0;
        for article in batch {
            let base = match (&article.ai_summary, &article.content) {
                (Some(summary), _) if !summary.trim().is_empty() => summary.clone(),
                (_, Some(content)) if !content.trim().is_empty() => format!(
                    "{}\n{}",
                    article.title.as_deref().unwrap_or(""),
                    truncate_chars(content, EMBED_BODY_CHARS)
                ),
                _ => {
                    debug!("No text to embed for article {}", article.id);
                    continue;
                }
            };

            match self.embedder.embed(&base).await {
                Ok(vector) => {
                    let now = now_ts();
                    match self
                        .db
                        .save_embedding(article.id, &encode_embedding(&vector), &now)
                        .await
                    {
                        Ok(()) => processed += 1,
                        Err(err) => {
                            error!("Failed to save embedding for {}: {}", article.id, err)
                        }
                    }
                }
                Err(err) => {
                    warn!("Embedding failed for article {}: {}", article.id, err);
                }
            }
        }

        Ok(processed)
    }

    /// Cluster assignment plus quality scoring, the re-entrant stage: a row
    /// that got a cluster but no score last time is claimed again here.
    async fn process_quality(&self, limit: i64) -> Result<usize> {
        let batch = self
            .db
            .claim_batch(Stage::Quality, limit, self.config.claim_lease_secs)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        // 1) Assign every claimed article to a cluster.
        let mut buckets: HashMap<i64, Vec<Article>> = HashMap::new();
        for article in batch {
            let embedding = match article.embedding.as_deref().map(decode_embedding) {
                Some(Ok(vector)) => vector,
                _ => {
                    // Malformed embedding: leave the row for a later pass.
                    warn!("Skipping article {} with unusable embedding", article.id);
                    continue;
                }
            };

            match assign_to_cluster(self.db, &self.config.cluster, &article, &embedding).await {
                Ok(cluster_id) => buckets.entry(cluster_id).or_default().push(article),
                Err(err) => error!("Cluster assignment failed for {}: {}", article.id, err),
            }
        }

        // 2) Score per cluster, counting corroboration across the whole
        //    membership, not just this batch.
        let now = now_ts();
        let mut processed = 0;
        for (cluster_id, members) in buckets {
            let provider_count = self
                .db
                .distinct_provider_count(cluster_id)
                .await
                .unwrap_or(1)
                .max(1);

            let mut scores = Vec::new();
            let mut union_flags: Vec<RiskFlag> = Vec::new();
            for article in &members {
                let Some(text) = article.assessable_text() else {
                    continue;
                };
                // When the body is missing the summary doubles as text, so
                // verification falls back to the headline.
                let ai_summary = match article.content.as_deref() {
                    Some(c) if !c.trim().is_empty() => {
                        article.ai_summary.clone().unwrap_or_default()
                    }
                    _ => String::new(),
                };

                let assessment = assess(
                    article.title.as_deref().unwrap_or(""),
                    &ai_summary,
                    text,
                    provider_count,
                );

                match self
                    .db
                    .update_quality(
                        article.id,
                        cluster_id,
                        assessment.score,
                        &flags_to_json(&assessment.flags),
                        assessment.badge.as_str(),
                        &now,
                    )
                    .await
                {
                    Ok(()) => {
                        scores.push(assessment.score);
                        for flag in assessment.flags {
                            if !union_flags.contains(&flag) {
                                union_flags.push(flag);
                            }
                        }
                        processed += 1;
                    }
                    Err(err) => error!("Failed to store quality for {}: {}", article.id, err),
                }
            }

            if !scores.is_empty() {
                let cluster_score = aggregate_score(&scores);
                let cluster_badge = badge_for(cluster_score, &union_flags);
                if let Err(err) = self
                    .db
                    .update_cluster_quality(
                        cluster_id,
                        cluster_score,
                        &flags_to_json(&union_flags),
                        cluster_badge.as_str(),
                    )
                    .await
                {
                    error!("Failed to store cluster quality for {}: {}", cluster_id, err);
                }
            }

            if let Err(err) = refresh_representative(self.db, cluster_id).await {
                error!("Failed to refresh representative for {}: {}", cluster_id, err);
            }
        }

        Ok(processed)
    }

    /// Synthesize the cluster headline/summary from its representative.
    /// Idempotent: a re-run after new members join overwrites the same
    /// three cluster fields.
    async fn process_representative_summaries(&self, limit: i64) -> Result<usize> {
        let batch = self
            .db
            .claim_batch(
                Stage::RepresentativeSummary,
                limit,
                self.config.claim_lease_secs,
            )
            .await?;

        let mut processed = 0;
        for article in batch {
            let cluster_id = match self.db.cluster_id_by_representative(article.id).await {
                Ok(Some(cluster_id)) => cluster_id,
                Ok(None) => continue,
                Err(err) => {
                    error!("Representative lookup failed for {}: {}", article.id, err);
                    continue;
                }
            };

            let members = match self.db.cluster_members(cluster_id, 5).await {
                Ok(members) if !members.is_empty() => members,
                Ok(_) => continue,
                Err(err) => {
                    error!("Failed to load members of cluster {}: {}", cluster_id, err);
                    continue;
                }
            };

            let prompt = prompts::cluster_summary(&members);
            let Some(response) = self.summarizer.generate(&prompt).await else {
                continue;
            };

            let (title, summary) = parse_title_and_summary(&response);
            if summary.trim().is_empty() {
                warn!("Empty summary response for cluster {}", cluster_id);
                continue;
            }
            let title = title
                .or_else(|| article.title.clone())
                .unwrap_or_default();

            if let Err(err) = self.db.save_summary(article.id, &summary).await {
                error!("Failed to save summary for {}: {}", article.id, err);
                continue;
            }
            if let Err(err) = self
                .db
                .set_cluster_summary(cluster_id, &title, &summary, article.url.as_deref())
                .await
            {
                error!("Failed to update cluster {}: {}", cluster_id, err);
                continue;
            }

            info!("Cluster {} summarized: '{}'", cluster_id, title);
            processed += 1;
        }

        Ok(processed)
    }

    /// One worker loop per stage: claim a batch, process it, sleep, repeat.
    /// Stops between batches when cancellation fires; anything claimed but
    /// unfinished comes back after its lease expires.
    pub async fn stage_worker(&self, stage: Stage, mut cancel: watch::Receiver<bool>) {
        info!("Starting {} worker", stage.as_str());
        loop {
            if *cancel.borrow() {
                break;
            }

            match self.run_stage(stage, self.config.batch_limit).await {
                Ok(count) if count > 0 => {
                    info!("{} worker processed {} rows", stage.as_str(), count)
                }
                Ok(_) => debug!("{} worker found nothing to do", stage.as_str()),
                Err(err) => error!("{} worker pass failed: {}", stage.as_str(), err),
            }

            tokio::select! {
                _ = cancel.changed() => break,
                _ = sleep(Duration::from_secs(self.config.stage_interval_secs)) => {}
            }
        }
        info!("Stopped {} worker", stage.as_str());
    }

    /// Rotate through the categories, ingesting one per round.
    pub async fn ingest_worker(&self, aggregator: &Aggregator, mut cancel: watch::Receiver<bool>) {
        info!("Starting ingest worker");
        let mut index = 0usize;
        loop {
            if *cancel.borrow() {
                break;
            }

            let category = CATEGORIES[index % CATEGORIES.len()];
            index += 1;

            let query = build_query(category, None);
            match aggregator
                .ingest(self.db, category, &query, self.config.ingest_size)
                .await
            {
                Ok(new_ids) => {
                    if !new_ids.is_empty() {
                        info!("Ingested {} new articles for '{}'", new_ids.len(), category);
                    }
                }
                Err(err) => error!("Ingest failed for '{}': {}", category, err),
            }

            tokio::select! {
                _ = cancel.changed() => break,
                _ = sleep(Duration::from_secs(self.config.ingest_interval_secs)) => {}
            }
        }
        info!("Stopped ingest worker");
    }
}
