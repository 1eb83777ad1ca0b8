//! In-memory store backend.
//!
//! Mirrors the Postgres contract over plain maps behind one `RwLock`.
//! Used by the test suite and for embedding the pipeline without a
//! database. Mutations take the write lock for their whole duration, so
//! each is atomic with respect to readers.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::adapters::DateRange;
use crate::errors::{StoreError, StoreResult};

use super::{
    ArticleRow, ArticleVectorRow, CitationProvider, ClusterRow, NewArticle, OpportunityScoreRow,
    Paging, RawScoreRow, ScoreUpdate, SearchRow, Store, UpsertOutcome,
};

#[derive(Default)]
struct Inner {
    next_article_id: i64,
    next_author_id: i64,
    next_search_id: i64,
    articles: BTreeMap<i64, ArticleRow>,
    pmid_index: HashMap<String, i64>,
    authors: HashMap<String, i64>,
    article_authors: Vec<(i64, i64)>,
    snapshots: HashMap<(i64, CitationProvider), (i64, chrono::NaiveDate)>,
    yearly: BTreeMap<i64, Vec<(i32, i64)>>,
    vectors: BTreeMap<i64, ArticleVectorRow>,
    searches: BTreeMap<i64, SearchRow>,
    search_articles: BTreeMap<i64, Vec<i64>>,
    scores: HashMap<i64, OpportunityScoreRow>,
    history: Vec<(i64, RawScoreRow)>,
    clusters: BTreeMap<i32, ClusterRow>,
}

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing_article(article_id: i64) -> StoreError {
    StoreError::Integrity(format!("article {article_id} does not exist"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_article(&self, article: &NewArticle) -> StoreResult<UpsertOutcome> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if let Some(&id) = inner.pmid_index.get(&article.pmid) {
            let row = inner.articles.get_mut(&id).expect("pmid index out of sync");
            if !article.title.is_empty() {
                row.title = article.title.clone();
            }
            merge_opt(&mut row.abstract_text, &article.abstract_text);
            merge_opt(&mut row.journal, &article.journal);
            merge_opt(&mut row.doi, &article.doi);
            if article.pub_date.is_some() {
                row.pub_date = article.pub_date;
            }
            return Ok(UpsertOutcome {
                article_id: id,
                was_created: false,
            });
        }

        inner.next_article_id += 1;
        let id = inner.next_article_id;
        inner.articles.insert(
            id,
            ArticleRow {
                id,
                pmid: article.pmid.clone(),
                title: article.title.clone(),
                abstract_text: article.abstract_text.clone(),
                journal: article.journal.clone(),
                pub_date: article.pub_date,
                doi: article.doi.clone(),
            },
        );
        inner.pmid_index.insert(article.pmid.clone(), id);
        Ok(UpsertOutcome {
            article_id: id,
            was_created: true,
        })
    }

    async fn attach_authors(&self, article_id: i64, names: &[String]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.articles.contains_key(&article_id) {
            return Err(missing_article(article_id));
        }
        for name in names {
            let author_id = match inner.authors.get(name).copied() {
                Some(id) => id,
                None => {
                    inner.next_author_id += 1;
                    let id = inner.next_author_id;
                    inner.authors.insert(name.clone(), id);
                    id
                }
            };
            if !inner.article_authors.contains(&(article_id, author_id)) {
                inner.article_authors.push((article_id, author_id));
            }
        }
        Ok(())
    }

    async fn record_citation_snapshot(
        &self,
        article_id: i64,
        source: CitationProvider,
        count: i64,
        observed_on: chrono::NaiveDate,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.articles.contains_key(&article_id) {
            return Err(missing_article(article_id));
        }
        inner
            .snapshots
            .insert((article_id, source), (count, observed_on));
        Ok(())
    }

    async fn record_yearly_citations(
        &self,
        article_id: i64,
        series: &[(i32, i64)],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.articles.contains_key(&article_id) {
            return Err(missing_article(article_id));
        }
        let mut sorted: Vec<(i32, i64)> = series.to_vec();
        sorted.sort_by_key(|&(year, _)| year);
        inner.yearly.insert(article_id, sorted);
        Ok(())
    }

    async fn upsert_vector(
        &self,
        article_id: i64,
        vector: &[f32],
        cluster_label: Option<i32>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.articles.contains_key(&article_id) {
            return Err(missing_article(article_id));
        }
        inner.vectors.insert(
            article_id,
            ArticleVectorRow {
                article_id,
                vector: vector.to_vec(),
                cluster_label,
            },
        );
        Ok(())
    }

    async fn create_search(
        &self,
        idea: &str,
        keywords: &str,
        max_results: i32,
        date_range: Option<&DateRange>,
    ) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;
        inner.next_search_id += 1;
        let search_id = inner.next_search_id;
        inner.searches.insert(
            search_id,
            SearchRow {
                search_id,
                idea_text: idea.to_string(),
                keyword_text: keywords.to_string(),
                max_results,
                start_date: date_range.map(|r| r.start),
                end_date: date_range.map(|r| r.end),
                created_at: Utc::now(),
            },
        );
        inner.search_articles.insert(search_id, Vec::new());
        Ok(search_id)
    }

    async fn link_search_articles(&self, search_id: i64, article_ids: &[i64]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.searches.contains_key(&search_id) {
            return Err(StoreError::Integrity(format!(
                "search {search_id} does not exist"
            )));
        }
        for &article_id in article_ids {
            if !inner.articles.contains_key(&article_id) {
                return Err(missing_article(article_id));
            }
        }
        let links = inner.search_articles.entry(search_id).or_default();
        for &article_id in article_ids {
            if !links.contains(&article_id) {
                links.push(article_id);
            }
        }
        Ok(())
    }

    async fn put_score(&self, search_id: i64, update: &ScoreUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.searches.contains_key(&search_id) {
            return Err(StoreError::Integrity(format!(
                "search {search_id} does not exist"
            )));
        }
        inner.scores.insert(
            search_id,
            OpportunityScoreRow {
                search_id,
                novelty: update.novelty,
                citation_velocity: update.citation_velocity,
                recency: update.recency,
                overall: update.overall,
                computed_at: Utc::now(),
            },
        );
        inner.history.push((
            search_id,
            RawScoreRow {
                novelty_raw: update.novelty_raw,
                citation_raw: update.citation_raw,
                recency_raw: update.recency_raw,
            },
        ));
        Ok(())
    }

    async fn delete_search(&self, search_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.searches.remove(&search_id);
        inner.search_articles.remove(&search_id);
        inner.scores.remove(&search_id);
        inner.history.retain(|(id, _)| *id != search_id);
        Ok(())
    }

    async fn list_articles(&self, paging: Paging) -> StoreResult<Vec<ArticleRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .articles
            .values()
            .skip(paging.offset as usize)
            .take(paging.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_article(&self, pmid: &str) -> StoreResult<Option<ArticleRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pmid_index
            .get(pmid)
            .and_then(|id| inner.articles.get(id))
            .cloned())
    }

    async fn list_searches(&self, paging: Paging) -> StoreResult<Vec<SearchRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .searches
            .values()
            .skip(paging.offset as usize)
            .take(paging.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_search(&self, search_id: i64) -> StoreResult<Option<SearchRow>> {
        let inner = self.inner.read().await;
        Ok(inner.searches.get(&search_id).cloned())
    }

    async fn articles_of_search(&self, search_id: i64) -> StoreResult<Vec<ArticleRow>> {
        let inner = self.inner.read().await;
        let Some(links) = inner.search_articles.get(&search_id) else {
            return Ok(Vec::new());
        };
        Ok(links
            .iter()
            .filter_map(|id| inner.articles.get(id))
            .cloned()
            .collect())
    }

    async fn vectors_of_search(&self, search_id: i64) -> StoreResult<Vec<ArticleVectorRow>> {
        let inner = self.inner.read().await;
        let Some(links) = inner.search_articles.get(&search_id) else {
            return Ok(Vec::new());
        };
        Ok(links
            .iter()
            .filter_map(|id| inner.vectors.get(id))
            .cloned()
            .collect())
    }

    async fn all_vectors(&self) -> StoreResult<Vec<ArticleVectorRow>> {
        let inner = self.inner.read().await;
        Ok(inner.vectors.values().cloned().collect())
    }

    async fn yearly_citations(&self, article_id: i64) -> StoreResult<Vec<(i32, i64)>> {
        let inner = self.inner.read().await;
        Ok(inner.yearly.get(&article_id).cloned().unwrap_or_default())
    }

    async fn raw_score_history(&self) -> StoreResult<Vec<RawScoreRow>> {
        let inner = self.inner.read().await;
        Ok(inner.history.iter().map(|(_, row)| *row).collect())
    }

    async fn get_score(&self, search_id: i64) -> StoreResult<Option<OpportunityScoreRow>> {
        let inner = self.inner.read().await;
        Ok(inner.scores.get(&search_id).copied())
    }

    async fn set_cluster_labels(&self, assignments: &[(i64, i32)]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        for &(article_id, label) in assignments {
            if let Some(row) = inner.vectors.get_mut(&article_id) {
                row.cluster_label = Some(label);
            }
        }
        Ok(())
    }

    async fn upsert_cluster(&self, cluster: &ClusterRow) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.clusters.insert(cluster.label, cluster.clone());
        Ok(())
    }

    async fn delete_clusters_except(&self, labels: &[i32]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.clusters.retain(|label, _| labels.contains(label));
        Ok(())
    }

    async fn cluster_rows(&self) -> StoreResult<Vec<ClusterRow>> {
        let inner = self.inner.read().await;
        Ok(inner.clusters.values().cloned().collect())
    }
}

fn merge_opt(existing: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming {
        if !value.is_empty() {
            *existing = Some(value.clone());
        }
    }
}
