//! Search ingestion.
//!
//! Realizes one search end to end:
//! 1. Normalize the semicolon-separated keyword list
//! 2. Expand each term with vocabulary synonyms (best effort)
//! 3. Compose the boolean query expression
//! 4. Create the search row
//! 5. Fetch articles, retrying transient failures with backoff
//! 6. Enrich each article under bounded concurrency: upsert, authors,
//!    citations, embedding, search link
//!
//! Ingest degrades article by article: one bad article never aborts the
//! search. Only the bibliographic fetch itself is fatal, and by then the
//! search row already exists and simply stays empty.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use backoff::ExponentialBackoffBuilder;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapters::{
    ArticleRecord, BibliographicSource, CitationKeys, CitationSource, DateRange, VocabularySource,
};
use crate::config::IngestConfig;
use crate::embeddings::Embedder;
use crate::errors::{PipelineError, PipelineResult, RemoteError};
use crate::store::{NewArticle, Store};

/// What one ingestion run produced.
#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    pub search_id: i64,
    pub articles_found: usize,
    pub articles_ingested: usize,
}

#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn Store>,
    bibliographic: Arc<dyn BibliographicSource>,
    citations: Arc<dyn CitationSource>,
    vocabulary: Arc<dyn VocabularySource>,
    embedder: Arc<dyn Embedder>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn Store>,
        bibliographic: Arc<dyn BibliographicSource>,
        citations: Arc<dyn CitationSource>,
        vocabulary: Arc<dyn VocabularySource>,
        embedder: Arc<dyn Embedder>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            bibliographic,
            citations,
            vocabulary,
            embedder,
            config,
        }
    }

    /// Run one search: create the search row, fetch, enrich, link.
    pub async fn run(
        &self,
        idea: &str,
        keywords: &str,
        max_results: usize,
        date_range: Option<DateRange>,
    ) -> PipelineResult<IngestOutcome> {
        let start = Instant::now();

        let terms = normalize_keywords(keywords);
        if terms.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }

        // Vocabulary expansion is best effort: a slow or broken service
        // leaves the term as its own group.
        let mut groups = Vec::with_capacity(terms.len());
        for term in &terms {
            let expansion = timeout(
                std::time::Duration::from_secs(self.config.vocabulary_timeout_secs),
                self.vocabulary.expand(std::slice::from_ref(term)),
            )
            .await;
            match expansion {
                Ok(list) if !list.is_empty() => groups.push(list),
                _ => {
                    debug!(%term, "vocabulary expansion unavailable");
                    groups.push(vec![term.clone()]);
                }
            }
        }
        let query = compose_query(&groups);

        let max_results = max_results.min(self.config.max_results_cap).max(1);
        let search_id = self
            .store
            .create_search(idea, keywords, max_results as i32, date_range.as_ref())
            .await?;
        metrics::counter!("primetime_searches_total").increment(1);

        let records = self
            .fetch_with_retry(&query, max_results, date_range.as_ref())
            .await
            .map_err(PipelineError::Bibliographic)?;
        let articles_found = records.len();
        debug!(search_id, %query, articles_found, "bibliographic fetch complete");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for record in records.into_iter().take(max_results) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let service = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                service.ingest_one(search_id, record).await
            });
        }

        let mut articles_ingested = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => articles_ingested += 1,
                Ok(false) => metrics::counter!("primetime_articles_skipped_total").increment(1),
                Err(err) => warn!(search_id, error = %err, "enrichment task panicked"),
            }
        }

        metrics::counter!("primetime_articles_ingested_total")
            .increment(articles_ingested as u64);
        metrics::histogram!("primetime_ingest_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        info!(
            search_id,
            articles_found,
            articles_ingested,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "search ingested"
        );

        Ok(IngestOutcome {
            search_id,
            articles_found,
            articles_ingested,
        })
    }

    async fn fetch_with_retry(
        &self,
        query: &str,
        max_results: usize,
        date_range: Option<&DateRange>,
    ) -> Result<Vec<ArticleRecord>, RemoteError> {
        let deadline = std::time::Duration::from_secs(self.config.bibliographic_timeout_secs);
        let max_attempts = self.config.retry_attempts.max(1);
        let attempts = AtomicU32::new(0);

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(std::time::Duration::from_millis(500))
            .build();

        backoff::future::retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let result = match timeout(
                deadline,
                self.bibliographic.search(query, max_results, date_range),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Transient(
                    "bibliographic search deadline expired".into(),
                )),
            };

            match result {
                Ok(records) => Ok(records),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    metrics::counter!("primetime_remote_retries_total").increment(1);
                    warn!(attempt, error = %err, "bibliographic search failed, retrying");
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        })
        .await
    }

    /// Enrich and link one article. Returns whether the article ended up
    /// linked to the search. Order matters: a reader that sees the link
    /// must be able to see the article row.
    async fn ingest_one(&self, search_id: i64, record: ArticleRecord) -> bool {
        let pmid = record.pmid.clone();

        let upsert = match self
            .store
            .upsert_article(&NewArticle {
                pmid: record.pmid.clone(),
                title: record.title.clone(),
                abstract_text: record.abstract_text.clone(),
                journal: record.journal.clone(),
                pub_date: record.pub_date,
                doi: record.doi.clone(),
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%pmid, error = %err, "article upsert failed, skipping enrichment");
                crate::metrics::record_error("article_upsert");
                return false;
            }
        };
        let article_id = upsert.article_id;

        let names: Vec<String> = record
            .authors
            .iter()
            .map(|name| normalize_author_name(name))
            .filter(|name| !name.is_empty())
            .collect();
        if !names.is_empty() {
            if let Err(err) = self.store.attach_authors(article_id, &names).await {
                warn!(%pmid, error = %err, "author attachment failed");
            }
        }

        self.enrich_citations(article_id, &record, &pmid).await;
        self.enrich_vector(article_id, &record, &pmid).await;

        if let Err(err) = self.store.link_search_articles(search_id, &[article_id]).await {
            warn!(search_id, %pmid, error = %err, "search link failed");
            return false;
        }
        true
    }

    async fn enrich_citations(&self, article_id: i64, record: &ArticleRecord, pmid: &str) {
        let deadline = std::time::Duration::from_secs(self.config.citation_timeout_secs);
        let keys = CitationKeys {
            doi: record.doi.clone(),
            pmid: record.pmid.clone(),
        };

        match timeout(deadline, self.citations.current_count(&keys)).await {
            Ok(Ok(observation)) => {
                if let Err(err) = self
                    .store
                    .record_citation_snapshot(
                        article_id,
                        observation.source,
                        observation.count,
                        observation.observed_on,
                    )
                    .await
                {
                    warn!(%pmid, error = %err, "citation snapshot write failed");
                }
            }
            Ok(Err(err)) => warn!(%pmid, error = %err, "citation count lookup failed"),
            Err(_) => warn!(%pmid, "citation count lookup timed out"),
        }

        match timeout(deadline, self.citations.yearly_counts(&keys)).await {
            Ok(Ok(series)) if !series.is_empty() => {
                if let Err(err) = self.store.record_yearly_citations(article_id, &series).await {
                    warn!(%pmid, error = %err, "yearly citation write failed");
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(%pmid, error = %err, "citation history lookup failed"),
            Err(_) => warn!(%pmid, "citation history lookup timed out"),
        }
    }

    async fn enrich_vector(&self, article_id: i64, record: &ArticleRecord, pmid: &str) {
        // The embedder enforces its own deadline (remote implementations
        // carry a request timeout from config).
        let text = format!(
            "{}\n{}",
            record.title,
            record.abstract_text.as_deref().unwrap_or("")
        );
        let embed_start = Instant::now();
        let embedded = self.embedder.embed(&text).await;
        metrics::histogram!("primetime_embedding_duration_seconds")
            .record(embed_start.elapsed().as_secs_f64());

        match embedded {
            Ok(vector) => {
                if let Err(err) = self.store.upsert_vector(article_id, &vector, None).await {
                    warn!(%pmid, error = %err, "vector write failed");
                }
            }
            Err(err) => warn!(%pmid, error = %err, "embedding failed"),
        }
    }
}

/// Split the raw keyword string on `;`, trim, drop empties, and fold
/// case-insensitive duplicates while keeping the first-seen casing.
pub(crate) fn normalize_keywords(raw: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut terms = Vec::new();
    for part in raw.split(';') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let folded = trimmed.to_lowercase();
        if !seen.contains(&folded) {
            seen.push(folded);
            terms.push(trimmed.to_string());
        }
    }
    terms
}

/// Boolean AND across terms, each term OR'd with its synonyms. Single
/// quotes are doubled; the expression is otherwise opaque to the store.
pub(crate) fn compose_query(groups: &[Vec<String>]) -> String {
    groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| {
            let joined = group
                .iter()
                .map(|term| term.replace('\'', "''"))
                .collect::<Vec<_>>()
                .join(" OR ");
            format!("({joined})")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Case-folded, whitespace-collapsed author name: the corpus-wide dedup
/// key. Homonym collisions are accepted.
pub(crate) fn normalize_author_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
