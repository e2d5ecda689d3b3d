use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use veritas::db::{Database, Stage};
use veritas::logging::configure_logging;
use veritas::pipeline::Pipeline;
use veritas::providers::keywords::build_query;
use veritas::providers::Aggregator;

#[derive(Parser)]
#[command(name = "veritas", about = "News ingestion, deduplication, and trust scoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingest scheduler and all stage workers until ctrl-c
    Worker,
    /// Fetch and store one category from all providers
    Ingest {
        #[arg(long)]
        category: String,
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 30)]
        size: usize,
    },
    /// Run one batch of a single pipeline stage
    Stage {
        #[arg(value_enum)]
        stage: StageArg,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// List recently updated clusters
    Clusters {
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print row counts for the main tables
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Content,
    Summaries,
    Embeddings,
    Quality,
    RepSummaries,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Content => Stage::Content,
            StageArg::Summaries => Stage::AiSummary,
            StageArg::Embeddings => Stage::Embedding,
            StageArg::Quality => Stage::Quality,
            StageArg::RepSummaries => Stage::RepresentativeSummary,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Worker => run_workers().await,
        Command::Ingest {
            category,
            query,
            size,
        } => {
            let db = Database::instance().await;
            let aggregator = Aggregator::from_env();
            let merged_query = build_query(&category, query.as_deref());
            let new_ids = aggregator.ingest(db, &category, &merged_query, size).await?;
            println!("{} new articles", new_ids.len());
            Ok(())
        }
        Command::Stage { stage, limit } => {
            let pipeline = Pipeline::from_env().await;
            let processed = pipeline.run_stage(stage.into(), limit).await?;
            println!("{} rows processed", processed);
            Ok(())
        }
        Command::Clusters { category, limit } => {
            let db = Database::instance().await;
            let clusters = db.recent_clusters(category.as_deref(), limit).await?;
            for cluster in clusters {
                println!(
                    "#{} [{}] score={} {}",
                    cluster.id,
                    cluster.badge.as_deref().unwrap_or("-"),
                    cluster
                        .quality_score
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    cluster.cluster_title.as_deref().unwrap_or("(untitled)")
                );
            }
            Ok(())
        }
        Command::Stats => {
            let db = Database::instance().await;
            println!("{}", db.collect_stats().await?);
            Ok(())
        }
    }
}

async fn run_workers() -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_env().await);
    let aggregator = Arc::new(Aggregator::from_env());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            error!("Failed to listen for ctrl-c");
        }
        let _ = cancel_tx.send(true);
    });

    let mut handles = Vec::new();

    {
        let pipeline = pipeline.clone();
        let aggregator = aggregator.clone();
        let cancel = cancel_rx.clone();
        handles.push(tokio::spawn(async move {
            pipeline.ingest_worker(&aggregator, cancel).await;
        }));
    }

    for stage in Stage::ALL {
        let pipeline = pipeline.clone();
        let cancel = cancel_rx.clone();
        handles.push(tokio::spawn(async move {
            pipeline.stage_worker(stage, cancel).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    info!("All workers stopped");
    Ok(())
}
