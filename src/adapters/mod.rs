//! Adapter interfaces to the external bibliographic ecosystem.
//!
//! The pipeline core talks to PubMed, the citation services, and the MeSH
//! vocabulary only through the narrow traits in this module. Concrete
//! clients live in the submodules; tests substitute deterministic stubs.

pub mod citations;
pub mod mesh;
pub mod pubmed;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::RemoteError;
use crate::store::CitationProvider;

/// Inclusive publication-date filter for a bibliographic search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One article as returned by the bibliographic corpus. PMID is the only
/// required field.
#[derive(Debug, Clone, Default)]
pub struct ArticleRecord {
    pub pmid: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub journal: Option<String>,
    pub pub_date: Option<NaiveDate>,
    pub doi: Option<String>,
    pub authors: Vec<String>,
}

/// Identifiers available for a citation lookup. DOI is preferred; PMID is
/// the fallback key.
#[derive(Debug, Clone)]
pub struct CitationKeys {
    pub doi: Option<String>,
    pub pmid: String,
}

/// A citation-count observation, tagged with the provider that produced it.
#[derive(Debug, Clone, Copy)]
pub struct CitationObservation {
    pub source: CitationProvider,
    pub count: i64,
    pub observed_on: NaiveDate,
}

/// Resolves a query expression to ranked article records (C2). Ordering
/// must follow the upstream relevance rank.
#[async_trait]
pub trait BibliographicSource: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        date_range: Option<&DateRange>,
    ) -> Result<Vec<ArticleRecord>, RemoteError>;
}

/// Retrieves current and historical citation counts (C3). A missing
/// article yields count 0 / an empty series, never an error.
#[async_trait]
pub trait CitationSource: Send + Sync {
    async fn current_count(&self, keys: &CitationKeys) -> Result<CitationObservation, RemoteError>;

    async fn yearly_counts(&self, keys: &CitationKeys) -> Result<Vec<(i32, i64)>, RemoteError>;
}

/// Expands a keyword list with controlled-vocabulary synonyms (C4).
/// Returns a superset of the input: originals first, then expansions in
/// input order, deduplicated case-insensitively. Upstream failure
/// degrades to the input unchanged, so the signature is infallible.
#[async_trait]
pub trait VocabularySource: Send + Sync {
    async fn expand(&self, terms: &[String]) -> Vec<String>;
}

/// Map a reqwest failure onto the retry taxonomy. Timeouts and transport
/// errors are transient; anything structural in the response is permanent.
pub(crate) fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RemoteError::Transient(err.to_string())
    } else {
        RemoteError::Permanent(err.to_string())
    }
}

/// Map a non-success HTTP status onto the retry taxonomy: 5xx and 429 are
/// transient, the rest permanent.
pub(crate) fn classify_status(status: reqwest::StatusCode, context: &str) -> RemoteError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Transient(format!("{context}: HTTP {status}"))
    } else {
        RemoteError::Permanent(format!("{context}: HTTP {status}"))
    }
}
