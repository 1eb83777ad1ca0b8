//! End-to-end pipeline tests over the in-memory store with deterministic
//! stub adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};

use primetime::adapters::{
    ArticleRecord, BibliographicSource, CitationKeys, CitationObservation, DateRange,
    VocabularySource,
};
use primetime::adapters::CitationSource;
use primetime::cluster::ClusterManager;
use primetime::config::{AppConfig, ClusterConfig};
use primetime::embeddings::HashingEmbedder;
use primetime::errors::RemoteError;
use primetime::scoring::ScoreService;
use primetime::store::{CitationProvider, NewArticle, ScoreUpdate, Store};
use primetime::{Coordinator, MemoryStore, PipelineError, ScoreStatus};

// ── Stub adapters ────────────────────────────────────────────────────────

struct ScriptedCorpus(Vec<ArticleRecord>);

#[async_trait]
impl BibliographicSource for ScriptedCorpus {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        _date_range: Option<&DateRange>,
    ) -> Result<Vec<ArticleRecord>, RemoteError> {
        Ok(self.0.iter().take(max_results).cloned().collect())
    }
}

struct FailingCorpus;

#[async_trait]
impl BibliographicSource for FailingCorpus {
    async fn search(
        &self,
        _query: &str,
        _max_results: usize,
        _date_range: Option<&DateRange>,
    ) -> Result<Vec<ArticleRecord>, RemoteError> {
        Err(RemoteError::Permanent("unparseable upstream document".into()))
    }
}

/// Citation stub keyed by PMID: fixed totals and yearly series.
struct ScriptedCitations {
    totals: HashMap<String, i64>,
    series: HashMap<String, Vec<(i32, i64)>>,
}

#[async_trait]
impl CitationSource for ScriptedCitations {
    async fn current_count(&self, keys: &CitationKeys) -> Result<CitationObservation, RemoteError> {
        Ok(CitationObservation {
            source: CitationProvider::Crossref,
            count: self.totals.get(&keys.pmid).copied().unwrap_or(0),
            observed_on: Utc::now().date_naive(),
        })
    }

    async fn yearly_counts(&self, keys: &CitationKeys) -> Result<Vec<(i32, i64)>, RemoteError> {
        Ok(self.series.get(&keys.pmid).cloned().unwrap_or_default())
    }
}

struct PassthroughVocabulary;

#[async_trait]
impl VocabularySource for PassthroughVocabulary {
    async fn expand(&self, terms: &[String]) -> Vec<String> {
        terms.to_vec()
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn record(pmid: &str, title: &str, abstract_text: &str, pub_date: Option<NaiveDate>) -> ArticleRecord {
    ArticleRecord {
        pmid: pmid.to_string(),
        title: title.to_string(),
        abstract_text: Some(abstract_text.to_string()),
        journal: Some("Test Journal".to_string()),
        pub_date,
        doi: Some(format!("10.1000/{pmid}")),
        authors: vec!["Doe, Jane".to_string()],
    }
}

/// Three articles with the citation trajectories of the CRISPR seed
/// scenario: strong growth, a single observation, and slow steady growth.
fn crispr_fixture() -> (Vec<ArticleRecord>, ScriptedCitations) {
    let this_year = Utc::now().year();
    let date = |years_ago: i32| NaiveDate::from_ymd_opt(this_year - years_ago, 1, 15);

    let records = vec![
        record("1001", "CRISPR base editing in sickle cell disease", "Gene editing.", date(1)),
        record("1002", "Gene therapy delivery vectors", "Vector design.", date(1)),
        record("1003", "Long term outcomes of hemoglobinopathies", "Follow-up.", date(4)),
    ];

    let mut totals = HashMap::new();
    totals.insert("1001".to_string(), 33);
    totals.insert("1002".to_string(), 1);
    totals.insert("1003".to_string(), 11);

    let mut series = HashMap::new();
    series.insert(
        "1001".to_string(),
        vec![(2022, 5), (2023, 10), (2024, 18)],
    );
    series.insert("1002".to_string(), vec![(2023, 1)]);
    series.insert(
        "1003".to_string(),
        vec![(2020, 0), (2021, 2), (2022, 2), (2023, 3), (2024, 4)],
    );

    (records, ScriptedCitations { totals, series })
}

fn coordinator_with(
    store: Arc<MemoryStore>,
    corpus: Arc<dyn BibliographicSource>,
    citations: Arc<dyn CitationSource>,
) -> Coordinator {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Coordinator::new(
        store,
        corpus,
        citations,
        Arc::new(PassthroughVocabulary),
        Arc::new(HashingEmbedder::new(64)),
        AppConfig::default(),
    )
}

// ── Seed scenario 1: empty history, single search ────────────────────────

#[tokio::test]
async fn first_search_scores_one_across_the_board() {
    let store = Arc::new(MemoryStore::new());
    let (records, citations) = crispr_fixture();
    let coordinator = coordinator_with(store.clone(), Arc::new(ScriptedCorpus(records)), Arc::new(citations));

    let outcome = coordinator
        .run_search(
            "CRISPR sickle cell disease therapy",
            "crispr; sickle cell; gene therapy",
            3,
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.articles_ingested, 3);
    coordinator.drain().await;

    let score = match coordinator.get_score(outcome.search_id).await.unwrap() {
        ScoreStatus::Scored(score) => score,
        ScoreStatus::NotReady => panic!("background scoring did not complete"),
    };

    // First entry in history: every component normalizes to 1.0.
    assert_eq!(score.novelty, 1.0);
    assert_eq!(score.citation_velocity, 1.0);
    assert_eq!(score.recency, 1.0);
    assert!((score.overall - 1.0).abs() < 1e-9);
    let weighted = 0.4 * score.novelty + 0.4 * score.citation_velocity + 0.2 * score.recency;
    assert!((score.overall - weighted).abs() < 1e-6);

    // The raw components behind it: the search spans the whole corpus so
    // novelty is the degenerate 1.0; growth trajectories give a positive
    // mean slope; two year-old articles and one four-year-old give the
    // exponential mix.
    let breakdown = coordinator.rescore(outcome.search_id).await.unwrap();
    assert_eq!(breakdown.novelty_raw, 1.0);
    assert!(breakdown.citation_raw > 0.0);
    let expected_recency = (2.0 * (-1.0f64 / 5.0).exp() + (-4.0f64 / 5.0).exp()) / 3.0;
    assert!((breakdown.recency_raw - expected_recency).abs() < 1e-9);

    // Three vectors is below the cluster floor: all noise, no clusters.
    let vectors = store.all_vectors().await.unwrap();
    assert!(vectors.iter().all(|v| v.cluster_label == Some(-1)));
    assert!(store.cluster_rows().await.unwrap().is_empty());
}

// ── Seed scenario 2: duplicate ingest ────────────────────────────────────

#[tokio::test]
async fn duplicate_ingest_reuses_articles_and_repeats_raws() {
    let store = Arc::new(MemoryStore::new());
    let (records, citations) = crispr_fixture();
    let coordinator = coordinator_with(store.clone(), Arc::new(ScriptedCorpus(records)), Arc::new(citations));

    let first = coordinator
        .run_search("idea", "crispr; sickle cell", 3, None)
        .await
        .unwrap();
    coordinator.drain().await;
    let second = coordinator
        .run_search("idea", "crispr; sickle cell", 3, None)
        .await
        .unwrap();
    coordinator.drain().await;

    assert_ne!(first.search_id, second.search_id);

    // The article table did not grow on the second pass.
    let articles = store.list_articles(Default::default()).await.unwrap();
    assert_eq!(articles.len(), 3);

    // Both searches link all three articles.
    for search_id in [first.search_id, second.search_id] {
        assert_eq!(store.articles_of_search(search_id).await.unwrap().len(), 3);
    }

    // Identical inputs, identical raw triples.
    let a = coordinator.rescore(first.search_id).await.unwrap();
    let b = coordinator.rescore(second.search_id).await.unwrap();
    assert_eq!(a.novelty_raw, b.novelty_raw);
    assert_eq!(a.citation_raw, b.citation_raw);
    assert_eq!(a.recency_raw, b.recency_raw);
}

// ── Seed scenario 3: bibliographic failure after search creation ─────────

#[tokio::test]
async fn failed_fetch_leaves_scoreable_empty_search() {
    let store = Arc::new(MemoryStore::new());
    let citations = ScriptedCitations {
        totals: HashMap::new(),
        series: HashMap::new(),
    };
    let coordinator = coordinator_with(store.clone(), Arc::new(FailingCorpus), Arc::new(citations));

    let err = coordinator
        .run_search("idea", "crispr", 5, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Bibliographic(RemoteError::Permanent(_))));

    // The search row remains, with zero linked articles.
    let searches = store.list_searches(Default::default()).await.unwrap();
    assert_eq!(searches.len(), 1);
    let search_id = searches[0].search_id;
    assert!(store.articles_of_search(search_id).await.unwrap().is_empty());

    // Scoring the empty search degrades to the boundary values.
    let breakdown = coordinator.rescore(search_id).await.unwrap();
    assert_eq!(breakdown.novelty_raw, 1.0);
    assert_eq!(breakdown.citation_raw, 0.0);
    assert_eq!(breakdown.recency_raw, 0.0);
}

// ── Seed scenario 4: normalization against a populated history ───────────

#[tokio::test]
async fn normalization_ranks_against_uniform_history() {
    let store = Arc::new(MemoryStore::new());

    // A hundred historical searches with raw novelty uniform in [0, 1].
    for i in 0..100 {
        let search_id = store
            .create_search("historic", "kw", 1, None)
            .await
            .unwrap();
        store
            .put_score(
                search_id,
                &ScoreUpdate {
                    novelty: 0.5,
                    citation_velocity: 0.5,
                    recency: 0.5,
                    overall: 0.5,
                    novelty_raw: i as f64 / 100.0,
                    citation_raw: 0.0,
                    recency_raw: 0.0,
                },
            )
            .await
            .unwrap();
    }

    // A search engineered to a raw novelty of exactly 0.5: two members,
    // one sitting on the lone outside vector (distance 0), one orthogonal
    // to it (distance 1).
    let member_a = store
        .upsert_article(&NewArticle {
            pmid: "a".into(),
            title: "a".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let member_b = store
        .upsert_article(&NewArticle {
            pmid: "b".into(),
            title: "b".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let outside = store
        .upsert_article(&NewArticle {
            pmid: "c".into(),
            title: "c".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .upsert_vector(member_a.article_id, &[1.0, 0.0], None)
        .await
        .unwrap();
    store
        .upsert_vector(member_b.article_id, &[0.0, 1.0], None)
        .await
        .unwrap();
    store
        .upsert_vector(outside.article_id, &[1.0, 0.0], None)
        .await
        .unwrap();

    let search_id = store.create_search("new", "kw", 2, None).await.unwrap();
    store
        .link_search_articles(search_id, &[member_a.article_id, member_b.article_id])
        .await
        .unwrap();

    let scorer = ScoreService::new(store.clone(), Default::default());
    let breakdown = scorer.score_search(search_id).await.unwrap();

    assert!((breakdown.novelty_raw - 0.5).abs() < 1e-9);
    assert!((breakdown.novelty - 0.5).abs() < 0.02);
}

// ── Seed scenario 5: clustering reproducibility ──────────────────────────

#[tokio::test]
async fn clustering_is_reproducible_for_a_fixed_seed() {
    let store = Arc::new(MemoryStore::new());

    // Two tight blobs of 100 vectors each in a 32-dimensional space.
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(1234);
    for i in 0..200 {
        let outcome = store
            .upsert_article(&NewArticle {
                pmid: format!("p{i}"),
                title: format!("article {i}"),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut vector = vec![0.0f32; 32];
        let axis = if i < 100 { 0 } else { 1 };
        vector[axis] = 1.0;
        for component in vector.iter_mut() {
            *component += rng.gen_range(-0.01f32..0.01);
        }
        store
            .upsert_vector(outcome.article_id, &vector, None)
            .await
            .unwrap();
    }

    let config = ClusterConfig {
        min_cluster_size: 5,
        n_neighbors: 10,
        projection_dim: 8,
        random_seed: 42,
    };
    let manager = ClusterManager::new(store.clone(), config);

    let first_pass = manager.run_pass().await.unwrap();
    let first_labels: Vec<Option<i32>> = store
        .all_vectors()
        .await
        .unwrap()
        .iter()
        .map(|v| v.cluster_label)
        .collect();

    let second_pass = manager.run_pass().await.unwrap();
    let second_labels: Vec<Option<i32>> = store
        .all_vectors()
        .await
        .unwrap()
        .iter()
        .map(|v| v.cluster_label)
        .collect();

    assert_eq!(first_pass.clusters, 2);
    assert_eq!(second_pass.clusters, 2);
    assert_eq!(first_labels, second_labels);

    // Cluster rows satisfy the size and centroid invariants.
    let vectors = store.all_vectors().await.unwrap();
    for cluster in store.cluster_rows().await.unwrap() {
        let members: Vec<_> = vectors
            .iter()
            .filter(|v| v.cluster_label == Some(cluster.label))
            .collect();
        assert_eq!(cluster.size as usize, members.len());

        for (d, &component) in cluster.centroid.iter().enumerate() {
            let mean: f32 =
                members.iter().map(|v| v.vector[d]).sum::<f32>() / members.len() as f32;
            assert!((component - mean).abs() < 1e-5);
        }
    }
}

// ── Seed scenario 6: recency edges ───────────────────────────────────────

#[tokio::test]
async fn recency_counts_dateless_articles_as_zero() {
    let store = Arc::new(MemoryStore::new());
    let today = Utc::now().date_naive();

    let citations = ScriptedCitations {
        totals: HashMap::new(),
        series: HashMap::new(),
    };
    let records = vec![
        record("1", "published today", "fresh", Some(today)),
        ArticleRecord {
            pmid: "2".into(),
            title: "undated".into(),
            ..Default::default()
        },
    ];
    let coordinator = coordinator_with(store.clone(), Arc::new(ScriptedCorpus(records)), Arc::new(citations));

    let outcome = coordinator
        .run_search("idea", "recency", 2, None)
        .await
        .unwrap();
    coordinator.drain().await;

    // Age zero contributes 1.0; the dateless article contributes 0 but
    // stays in the denominator.
    let breakdown = coordinator.rescore(outcome.search_id).await.unwrap();
    assert!((breakdown.recency_raw - 0.5).abs() < 1e-9);
}

// ── Round-trip property ──────────────────────────────────────────────────

#[tokio::test]
async fn vector_round_trip_is_bit_exact() {
    let store = Arc::new(MemoryStore::new());
    let outcome = store
        .upsert_article(&NewArticle {
            pmid: "rt".into(),
            title: "round trip".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let vector: Vec<f32> = (0..768).map(|i| (i as f32 * 0.1).sin()).collect();
    store
        .upsert_vector(outcome.article_id, &vector, None)
        .await
        .unwrap();

    let stored = store.all_vectors().await.unwrap();
    assert_eq!(stored[0].vector, vector);
}
