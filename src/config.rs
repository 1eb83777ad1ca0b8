//! Configuration for the pipeline.
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/<env>, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedder configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Scoring configuration
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Clustering configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// PubMed / NCBI E-utilities configuration
    #[serde(default)]
    pub pubmed: PubmedConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: "hashing" (local, deterministic) or "remote"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API endpoint for the remote provider
    pub api_url: Option<String>,

    /// API key for the remote provider
    pub api_key: Option<String>,

    /// Vector length; must match the embedder
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Worker count for per-article enrichment
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,

    /// Hard ceiling on requested max_results
    #[serde(default = "default_max_results_cap")]
    pub max_results_cap: usize,

    /// Deadline for one bibliographic search call
    #[serde(default = "default_bibliographic_timeout")]
    pub bibliographic_timeout_secs: u64,

    /// Deadline for citation lookups, per article
    #[serde(default = "default_citation_timeout")]
    pub citation_timeout_secs: u64,

    /// Deadline for vocabulary expansion
    #[serde(default = "default_vocabulary_timeout")]
    pub vocabulary_timeout_secs: u64,

    /// Attempts per transient-failing remote call
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Decay half-life for the recency component, in years
    #[serde(default = "default_recency_tau")]
    pub recency_tau_years: f64,

    /// Weight of the normalized novelty component
    #[serde(default = "default_novelty_weight")]
    pub novelty_weight: f64,

    /// Weight of the normalized citation-velocity component
    #[serde(default = "default_velocity_weight")]
    pub velocity_weight: f64,

    /// Weight of the normalized recency component
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Smallest population a cluster may have; below it, points are noise
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Neighborhood size used to derive the density radius
    #[serde(default = "default_n_neighbors")]
    pub n_neighbors: usize,

    /// Dimensionality of the random projection the clusterer runs on
    #[serde(default = "default_projection_dim")]
    pub projection_dim: usize,

    /// Seed for the projection; two passes over the same vectors with the
    /// same seed must produce the same labeling
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PubmedConfig {
    /// Contact email sent to NCBI (required by their usage policy)
    #[serde(default = "default_pubmed_email")]
    pub email: String,

    /// Tool name sent to NCBI
    #[serde(default = "default_pubmed_tool")]
    pub tool: String,

    /// Optional NCBI API key for higher rate limits
    pub api_key: Option<String>,
}

// Default value functions
fn default_database_url() -> String {
    "postgres://localhost/primetime".to_string()
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_embedding_dimension() -> usize {
    768
}
fn default_embedding_timeout() -> u64 {
    5
}
fn default_ingest_concurrency() -> usize {
    8
}
fn default_max_results_cap() -> usize {
    100
}
fn default_bibliographic_timeout() -> u64 {
    30
}
fn default_citation_timeout() -> u64 {
    15
}
fn default_vocabulary_timeout() -> u64 {
    10
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_recency_tau() -> f64 {
    5.0
}
fn default_novelty_weight() -> f64 {
    0.4
}
fn default_velocity_weight() -> f64 {
    0.4
}
fn default_recency_weight() -> f64 {
    0.2
}
fn default_min_cluster_size() -> usize {
    5
}
fn default_n_neighbors() -> usize {
    10
}
fn default_projection_dim() -> usize {
    16
}
fn default_random_seed() -> u64 {
    42
}
fn default_pubmed_email() -> String {
    "contact@example.org".to_string()
}
fn default_pubmed_tool() -> String {
    "primetime".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_url: None,
            api_key: None,
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_ingest_concurrency(),
            max_results_cap: default_max_results_cap(),
            bibliographic_timeout_secs: default_bibliographic_timeout(),
            citation_timeout_secs: default_citation_timeout(),
            vocabulary_timeout_secs: default_vocabulary_timeout(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recency_tau_years: default_recency_tau(),
            novelty_weight: default_novelty_weight(),
            velocity_weight: default_velocity_weight(),
            recency_weight: default_recency_weight(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            n_neighbors: default_n_neighbors(),
            projection_dim: default_projection_dim(),
            random_seed: default_random_seed(),
        }
    }
}

impl Default for PubmedConfig {
    fn default() -> Self {
        Self {
            email: default_pubmed_email(),
            tool: default_pubmed_tool(),
            api_key: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            scoring: ScoringConfig::default(),
            cluster: ClusterConfig::default(),
            pubmed: PubmedConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment.
    ///
    /// `.env` is honored; environment variables use the `APP__` prefix
    /// with `__` as the section separator, e.g. `APP__DATABASE__URL=…`.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    pub fn bibliographic_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest.bibliographic_timeout_secs)
    }

    pub fn citation_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest.citation_timeout_secs)
    }

    pub fn vocabulary_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest.vocabulary_timeout_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_contract() {
        let config = AppConfig::default();
        assert_eq!(config.ingest.concurrency, 8);
        assert_eq!(config.ingest.max_results_cap, 100);
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.scoring.recency_tau_years, 5.0);
        assert_eq!(config.cluster.min_cluster_size, 5);
        assert_eq!(config.cluster.random_seed, 42);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let s = ScoringConfig::default();
        let total = s.novelty_weight + s.velocity_weight + s.recency_weight;
        assert!((total - 1.0).abs() < 1e-9);
    }
}
