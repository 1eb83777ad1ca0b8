//! Pipeline coordination.
//!
//! The [`Coordinator`] is the public entry point consumed by the host
//! application: it runs ingestion synchronously, schedules the scoring
//! chain (clustering, then scoring) as a tracked background task, and
//! answers reads. It owns the adapter instances and the single embedder,
//! constructed once and shared by reference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapters::citations::CitationClient;
use crate::adapters::mesh::MeshClient;
use crate::adapters::pubmed::PubMedClient;
use crate::adapters::{BibliographicSource, CitationSource, DateRange, VocabularySource};
use crate::cluster::ClusterManager;
use crate::config::AppConfig;
use crate::embeddings::{Embedder, HashingEmbedder, RemoteEmbedder};
use crate::errors::{PipelineError, PipelineResult};
use crate::ingest::{IngestOutcome, IngestService};
use crate::scoring::{ScoreBreakdown, ScoreService};
use crate::store::{ArticleRow, OpportunityScoreRow, Paging, SearchRow, Store};

/// Result of a score lookup. A search that exists but has not finished
/// background scoring is `NotReady` — a state, not an error.
#[derive(Debug, Clone, Copy)]
pub enum ScoreStatus {
    Scored(OpportunityScoreRow),
    NotReady,
}

pub struct Coordinator {
    store: Arc<dyn Store>,
    ingest: IngestService,
    cluster: Arc<ClusterManager>,
    scorer: Arc<ScoreService>,
    /// Exclusive lock over one clustering pass. Ingests proceed
    /// concurrently; their vectors are picked up on the next pass.
    cluster_lock: Arc<Mutex<()>>,
    /// Per-search scoring locks: at most one scoring task per search.
    score_locks: Arc<std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
    background: Mutex<JoinSet<()>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        bibliographic: Arc<dyn BibliographicSource>,
        citations: Arc<dyn CitationSource>,
        vocabulary: Arc<dyn VocabularySource>,
        embedder: Arc<dyn Embedder>,
        config: AppConfig,
    ) -> Self {
        crate::metrics::register_metric_descriptions();

        let ingest = IngestService::new(
            store.clone(),
            bibliographic,
            citations,
            vocabulary,
            embedder,
            config.ingest.clone(),
        );
        let cluster = Arc::new(ClusterManager::new(store.clone(), config.cluster.clone()));
        let scorer = Arc::new(ScoreService::new(store.clone(), config.scoring.clone()));

        Self {
            store,
            ingest,
            cluster,
            scorer,
            cluster_lock: Arc::new(Mutex::new(())),
            score_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Wire the shipped adapters (PubMed, CrossRef/OpenAlex, MeSH) and
    /// the configured embedder.
    pub fn from_config(store: Arc<dyn Store>, config: AppConfig) -> Self {
        let bibliographic = Arc::new(PubMedClient::new(
            config.pubmed.clone(),
            config.bibliographic_timeout(),
        ));
        let citations = Arc::new(CitationClient::new(
            config.citation_timeout(),
            &config.pubmed.email,
        ));
        let vocabulary = Arc::new(MeshClient::new(config.vocabulary_timeout()));
        let embedder: Arc<dyn Embedder> = match config.embedding.provider.as_str() {
            "remote" => Arc::new(RemoteEmbedder::new(config.embedding.clone())),
            _ => Arc::new(HashingEmbedder::new(config.embedding.dimension)),
        };
        Self::new(store, bibliographic, citations, vocabulary, embedder, config)
    }

    /// Run one search. Returns once the search row and its articles are
    /// persisted; clustering and scoring continue in the background.
    pub async fn run_search(
        &self,
        idea: &str,
        keywords: &str,
        max_results: usize,
        date_range: Option<DateRange>,
    ) -> PipelineResult<IngestOutcome> {
        let outcome = self.ingest.run(idea, keywords, max_results, date_range).await?;
        self.spawn_scoring(outcome.search_id).await;
        Ok(outcome)
    }

    async fn spawn_scoring(&self, search_id: i64) {
        let cluster = self.cluster.clone();
        let scorer = self.scorer.clone();
        let cluster_lock = self.cluster_lock.clone();
        let key_lock = self.key_lock(search_id);

        let mut background = self.background.lock().await;
        background.spawn(async move {
            // Someone is already scoring this search; re-scoring is
            // idempotent, so the in-flight run is enough.
            let Ok(_guard) = key_lock.try_lock() else {
                debug!(search_id, "scoring already in flight, skipping");
                return;
            };

            {
                let _cluster_guard = cluster_lock.lock().await;
                if let Err(err) = cluster.run_pass().await {
                    warn!(search_id, error = %err, "clustering pass failed");
                    crate::metrics::record_error("clustering");
                }
            }

            match scorer.score_search(search_id).await {
                Ok(breakdown) => {
                    info!(search_id, overall = breakdown.overall, "background scoring done")
                }
                // The search stays unscored; rescore() recovers it later.
                Err(err) => {
                    warn!(search_id, error = %err, "background scoring failed");
                    crate::metrics::record_error("scoring");
                }
            }
        });
    }

    /// Re-run clustering and scoring for an existing search,
    /// synchronously. Safe to call repeatedly; the recovery path for a
    /// search whose background scoring failed.
    pub async fn rescore(&self, search_id: i64) -> PipelineResult<ScoreBreakdown> {
        self.store
            .get_search(search_id)
            .await?
            .ok_or(PipelineError::SearchNotFound(search_id))?;

        let key_lock = self.key_lock(search_id);
        let _guard = key_lock.lock().await;

        {
            let _cluster_guard = self.cluster_lock.lock().await;
            self.cluster.run_pass().await?;
        }
        self.scorer.score_search(search_id).await
    }

    pub async fn get_score(&self, search_id: i64) -> PipelineResult<ScoreStatus> {
        self.store
            .get_search(search_id)
            .await?
            .ok_or(PipelineError::SearchNotFound(search_id))?;
        Ok(match self.store.get_score(search_id).await? {
            Some(score) => ScoreStatus::Scored(score),
            None => ScoreStatus::NotReady,
        })
    }

    pub async fn list_articles(&self, paging: Paging) -> PipelineResult<Vec<ArticleRow>> {
        Ok(self.store.list_articles(paging).await?)
    }

    pub async fn get_article(&self, pmid: &str) -> PipelineResult<Option<ArticleRow>> {
        Ok(self.store.get_article(pmid).await?)
    }

    pub async fn list_searches(&self, paging: Paging) -> PipelineResult<Vec<SearchRow>> {
        Ok(self.store.list_searches(paging).await?)
    }

    pub async fn articles_of_search(&self, search_id: i64) -> PipelineResult<Vec<ArticleRow>> {
        Ok(self.store.articles_of_search(search_id).await?)
    }

    pub async fn delete_search(&self, search_id: i64) -> PipelineResult<()> {
        Ok(self.store.delete_search(search_id).await?)
    }

    /// Wait for all in-flight background scoring tasks to finish.
    pub async fn drain(&self) {
        let mut background = self.background.lock().await;
        while background.join_next().await.is_some() {}
    }

    /// Drain with a grace period; tasks still running afterwards are
    /// aborted.
    pub async fn shutdown(&self, grace: Duration) {
        if tokio::time::timeout(grace, self.drain()).await.is_err() {
            let mut background = self.background.lock().await;
            warn!("shutdown grace period expired, aborting background tasks");
            background.abort_all();
        }
    }

    fn key_lock(&self, search_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self
            .score_locks
            .lock()
            .expect("score lock registry is never poisoned");
        locks
            .entry(search_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ArticleRecord, CitationKeys, CitationObservation};
    use crate::errors::RemoteError;
    use crate::store::memory::MemoryStore;
    use crate::store::CitationProvider;
    use async_trait::async_trait;

    struct EmptyCorpus;

    #[async_trait]
    impl BibliographicSource for EmptyCorpus {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _date_range: Option<&DateRange>,
        ) -> Result<Vec<ArticleRecord>, RemoteError> {
            Ok(Vec::new())
        }
    }

    struct NoCitations;

    #[async_trait]
    impl CitationSource for NoCitations {
        async fn current_count(
            &self,
            _keys: &CitationKeys,
        ) -> Result<CitationObservation, RemoteError> {
            Ok(CitationObservation {
                source: CitationProvider::OpenAlex,
                count: 0,
                observed_on: chrono::Utc::now().date_naive(),
            })
        }

        async fn yearly_counts(
            &self,
            _keys: &CitationKeys,
        ) -> Result<Vec<(i32, i64)>, RemoteError> {
            Ok(Vec::new())
        }
    }

    struct NoVocabulary;

    #[async_trait]
    impl VocabularySource for NoVocabulary {
        async fn expand(&self, terms: &[String]) -> Vec<String> {
            terms.to_vec()
        }
    }

    fn coordinator(store: Arc<MemoryStore>) -> Coordinator {
        Coordinator::new(
            store,
            Arc::new(EmptyCorpus),
            Arc::new(NoCitations),
            Arc::new(NoVocabulary),
            Arc::new(HashingEmbedder::new(16)),
            AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn score_of_unknown_search_is_an_error() {
        let coordinator = coordinator(Arc::new(MemoryStore::new()));
        let err = coordinator.get_score(404).await.unwrap_err();
        assert!(matches!(err, PipelineError::SearchNotFound(404)));
    }

    #[tokio::test]
    async fn score_becomes_ready_after_drain() {
        let coordinator = coordinator(Arc::new(MemoryStore::new()));

        let outcome = coordinator
            .run_search("an idea", "crispr", 5, None)
            .await
            .unwrap();
        coordinator.drain().await;

        match coordinator.get_score(outcome.search_id).await.unwrap() {
            ScoreStatus::Scored(score) => {
                // Empty article set: novelty raw 1, velocity raw 0,
                // recency raw 0, all first-in-history.
                assert_eq!(score.overall, 1.0);
            }
            ScoreStatus::NotReady => panic!("scoring did not run"),
        }
    }

    #[tokio::test]
    async fn rescore_is_idempotent() {
        let coordinator = coordinator(Arc::new(MemoryStore::new()));
        let outcome = coordinator
            .run_search("an idea", "crispr", 5, None)
            .await
            .unwrap();
        coordinator.drain().await;

        let first = coordinator.rescore(outcome.search_id).await.unwrap();
        let second = coordinator.rescore(outcome.search_id).await.unwrap();
        assert_eq!(first.novelty_raw, second.novelty_raw);
        assert_eq!(first.citation_raw, second.citation_raw);
        assert_eq!(first.recency_raw, second.recency_raw);
    }
}
