use crate::environment::get_env_parsed;

/// Tunables for the clustering engine. The similarity threshold and the
/// candidate time window are deliberately configuration, not constants:
/// the right values depend on the embedding model in use.
#[derive(Clone, Copy, Debug)]
pub struct ClusterConfig {
    /// Minimum cosine similarity for an article to join an existing cluster.
    pub similarity_threshold: f64,
    /// Candidates are drawn from +/- this many hours around `published_at`.
    pub window_hours: i64,
    /// Upper bound on the candidate pool per assignment.
    pub candidate_limit: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            similarity_threshold: 0.85,
            window_hours: 48,
            candidate_limit: 200,
        }
    }
}

impl ClusterConfig {
    pub fn from_env() -> Self {
        let defaults = ClusterConfig::default();
        ClusterConfig {
            similarity_threshold: get_env_parsed(
                "VERITAS_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            window_hours: get_env_parsed("VERITAS_WINDOW_HOURS", defaults.window_hours),
            candidate_limit: get_env_parsed("VERITAS_CANDIDATE_LIMIT", defaults.candidate_limit),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub cluster: ClusterConfig,
    /// How long a claimed row stays invisible to other workers.
    pub claim_lease_secs: i64,
    /// Batch size for each stage pass.
    pub batch_limit: i64,
    /// Sleep between stage batches in the worker loops.
    pub stage_interval_secs: u64,
    /// Sleep between ingest rounds (one category per round).
    pub ingest_interval_secs: u64,
    /// How many articles to request from each provider per ingest round.
    pub ingest_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            cluster: ClusterConfig::default(),
            claim_lease_secs: 600,
            batch_limit: 20,
            stage_interval_secs: 30,
            ingest_interval_secs: 120,
            ingest_size: 30,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            cluster: ClusterConfig::from_env(),
            claim_lease_secs: get_env_parsed("VERITAS_CLAIM_LEASE_SECS", defaults.claim_lease_secs),
            batch_limit: get_env_parsed("VERITAS_BATCH_LIMIT", defaults.batch_limit),
            stage_interval_secs: get_env_parsed(
                "VERITAS_STAGE_INTERVAL_SECS",
                defaults.stage_interval_secs,
            ),
            ingest_interval_secs: get_env_parsed(
                "VERITAS_INGEST_INTERVAL_SECS",
                defaults.ingest_interval_secs,
            ),
            ingest_size: get_env_parsed("VERITAS_INGEST_SIZE", defaults.ingest_size),
        }
    }
}
