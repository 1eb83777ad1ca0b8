//! Storage layer abstraction and implementations.
//!
//! This module defines the interface for persisting articles, authors,
//! citations, searches, vectors, clusters, and score history. The
//! abstraction allows different backends (Postgres in production, an
//! in-memory store for tests and embedded use) behind one contract.
//!
//! Every mutating operation runs in a single transaction: partial failure
//! leaves no observable state change. Unique-violations on natural keys
//! (PMID, search-article links, author names) are no-ops, never errors.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::adapters::DateRange;
use crate::errors::StoreResult;

/// Which citation service produced a snapshot. Closed enumeration; the
/// database stores the lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CitationProvider {
    Crossref,
    OpenAlex,
}

impl CitationProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CitationProvider::Crossref => "crossref",
            CitationProvider::OpenAlex => "openalex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crossref" => Some(CitationProvider::Crossref),
            "openalex" => Some(CitationProvider::OpenAlex),
            _ => None,
        }
    }
}

/// Incoming article fields for an upsert. Empty / `None` fields never
/// clear data already on the row.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub pmid: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub journal: Option<String>,
    pub pub_date: Option<NaiveDate>,
    pub doi: Option<String>,
}

/// A stored article.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRow {
    pub id: i64,
    pub pmid: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub journal: Option<String>,
    pub pub_date: Option<NaiveDate>,
    pub doi: Option<String>,
}

/// Result of an article upsert.
#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub article_id: i64,
    pub was_created: bool,
}

/// One user-initiated search.
#[derive(Debug, Clone)]
pub struct SearchRow {
    pub search_id: i64,
    pub idea_text: String,
    pub keyword_text: String,
    pub max_results: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// The embedding of one article plus its cluster assignment.
/// `cluster_label` of -1 marks noise; `None` means not yet clustered.
#[derive(Debug, Clone)]
pub struct ArticleVectorRow {
    pub article_id: i64,
    pub vector: Vec<f32>,
    pub cluster_label: Option<i32>,
}

/// One persisted cluster. Labels are always >= 0; noise is never stored
/// as a cluster row.
#[derive(Debug, Clone)]
pub struct ClusterRow {
    pub label: i32,
    pub centroid: Vec<f32>,
    pub size: i64,
    pub velocity: f64,
    pub last_updated: DateTime<Utc>,
}

/// The normalized opportunity score of one search.
#[derive(Debug, Clone, Copy)]
pub struct OpportunityScoreRow {
    pub search_id: i64,
    pub novelty: f64,
    pub citation_velocity: f64,
    pub recency: f64,
    pub overall: f64,
    pub computed_at: DateTime<Utc>,
}

/// Raw (pre-normalization) component values of one historical search.
#[derive(Debug, Clone, Copy)]
pub struct RawScoreRow {
    pub novelty_raw: f64,
    pub citation_raw: f64,
    pub recency_raw: f64,
}

/// Everything `put_score` persists: the normalized score row plus the raw
/// triple appended to history in the same transaction.
#[derive(Debug, Clone, Copy)]
pub struct ScoreUpdate {
    pub novelty: f64,
    pub citation_velocity: f64,
    pub recency: f64,
    pub overall: f64,
    pub novelty_raw: f64,
    pub citation_raw: f64,
    pub recency_raw: f64,
}

/// Offset/limit paging for list reads.
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Durable, transactional persistence for the pipeline.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert an article keyed by PMID. Non-empty incoming fields
    /// overwrite; empty incoming fields never clear existing data.
    async fn upsert_article(&self, article: &NewArticle) -> StoreResult<UpsertOutcome>;

    /// Ensure author rows exist for the given normalized names and link
    /// them to the article. Idempotent.
    async fn attach_authors(&self, article_id: i64, names: &[String]) -> StoreResult<()>;

    /// Record the latest total citation count from one provider,
    /// replacing any prior snapshot for the same (article, provider).
    async fn record_citation_snapshot(
        &self,
        article_id: i64,
        source: CitationProvider,
        count: i64,
        observed_on: NaiveDate,
    ) -> StoreResult<()>;

    /// Replace the yearly citation series of an article atomically.
    async fn record_yearly_citations(
        &self,
        article_id: i64,
        series: &[(i32, i64)],
    ) -> StoreResult<()>;

    /// Idempotent on article_id; overwrites vector and label.
    async fn upsert_vector(
        &self,
        article_id: i64,
        vector: &[f32],
        cluster_label: Option<i32>,
    ) -> StoreResult<()>;

    async fn create_search(
        &self,
        idea: &str,
        keywords: &str,
        max_results: i32,
        date_range: Option<&DateRange>,
    ) -> StoreResult<i64>;

    /// Link articles to a search. Duplicates are ignored.
    async fn link_search_articles(&self, search_id: i64, article_ids: &[i64]) -> StoreResult<()>;

    /// Overwrite the score of a search and append its raw values to
    /// score history, in one transaction.
    async fn put_score(&self, search_id: i64, update: &ScoreUpdate) -> StoreResult<()>;

    /// Delete a search. Join rows, the score row, and history rows go
    /// with it; articles stay.
    async fn delete_search(&self, search_id: i64) -> StoreResult<()>;

    async fn list_articles(&self, paging: Paging) -> StoreResult<Vec<ArticleRow>>;

    async fn get_article(&self, pmid: &str) -> StoreResult<Option<ArticleRow>>;

    async fn list_searches(&self, paging: Paging) -> StoreResult<Vec<SearchRow>>;

    async fn get_search(&self, search_id: i64) -> StoreResult<Option<SearchRow>>;

    async fn articles_of_search(&self, search_id: i64) -> StoreResult<Vec<ArticleRow>>;

    async fn vectors_of_search(&self, search_id: i64) -> StoreResult<Vec<ArticleVectorRow>>;

    /// Every vector row in the corpus, in stable article-id order.
    async fn all_vectors(&self) -> StoreResult<Vec<ArticleVectorRow>>;

    /// Yearly citation series of one article, ascending by year.
    async fn yearly_citations(&self, article_id: i64) -> StoreResult<Vec<(i32, i64)>>;

    /// The full raw-score history, oldest first.
    async fn raw_score_history(&self) -> StoreResult<Vec<RawScoreRow>>;

    async fn get_score(&self, search_id: i64) -> StoreResult<Option<OpportunityScoreRow>>;

    /// Bulk-update cluster labels on vector rows.
    async fn set_cluster_labels(&self, assignments: &[(i64, i32)]) -> StoreResult<()>;

    async fn upsert_cluster(&self, cluster: &ClusterRow) -> StoreResult<()>;

    /// Remove cluster rows whose label is not in `labels`.
    async fn delete_clusters_except(&self, labels: &[i32]) -> StoreResult<()>;

    async fn cluster_rows(&self) -> StoreResult<Vec<ClusterRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trip() {
        for p in [CitationProvider::Crossref, CitationProvider::OpenAlex] {
            assert_eq!(CitationProvider::parse(p.as_str()), Some(p));
        }
        assert_eq!(CitationProvider::parse("scopus"), None);
    }

    #[test]
    fn default_paging() {
        let p = Paging::default();
        assert_eq!(p.offset, 0);
        assert_eq!(p.limit, 50);
    }
}
