//! Citation-count client: CrossRef first, OpenAlex as fallback.
//!
//! CrossRef only knows DOIs and only carries the current total
//! (`is-referenced-by-count`); OpenAlex resolves DOI or PMID and carries
//! the yearly series (`counts_by_year`). Missing articles yield zero
//! counts and empty series, never errors.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::errors::RemoteError;
use crate::store::CitationProvider;

use super::{classify_status, classify_transport, CitationKeys, CitationObservation, CitationSource};

const CROSSREF_BASE: &str = "https://api.crossref.org/works";
const OPENALEX_BASE: &str = "https://api.openalex.org/works";

pub struct CitationClient {
    client: reqwest::Client,
}

impl CitationClient {
    pub fn new(timeout: std::time::Duration, contact_email: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("primetime/0.1 (mailto:{contact_email})"))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client }
    }

    /// Total citation count from CrossRef, `None` when the DOI is unknown.
    async fn crossref_count(&self, doi: &str) -> Result<Option<i64>, RemoteError> {
        let response = self
            .client
            .get(format!("{CROSSREF_BASE}/{doi}"))
            .send()
            .await
            .map_err(classify_transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "crossref"));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Permanent(format!("crossref: invalid JSON: {e}")))?;
        Ok(body["message"]["is-referenced-by-count"].as_i64())
    }

    /// Fetch the OpenAlex work document for a DOI or PMID, `None` on 404.
    async fn openalex_work(
        &self,
        keys: &CitationKeys,
    ) -> Result<Option<serde_json::Value>, RemoteError> {
        let id = match &keys.doi {
            Some(doi) => format!("doi:{}", doi.to_lowercase()),
            None => format!("pmid:{}", keys.pmid),
        };
        let response = self
            .client
            .get(format!("{OPENALEX_BASE}/{id}"))
            .send()
            .await
            .map_err(classify_transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(%id, "openalex has no record");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "openalex"));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| RemoteError::Permanent(format!("openalex: invalid JSON: {e}")))
    }
}

#[async_trait]
impl CitationSource for CitationClient {
    async fn current_count(&self, keys: &CitationKeys) -> Result<CitationObservation, RemoteError> {
        let observed_on = Utc::now().date_naive();

        // Primary: CrossRef. A zero count is treated as missing so the
        // fallback still gets a chance to disagree.
        if let Some(doi) = &keys.doi {
            if let Some(count) = self.crossref_count(doi).await? {
                if count > 0 {
                    return Ok(CitationObservation {
                        source: CitationProvider::Crossref,
                        count,
                        observed_on,
                    });
                }
            }
        }

        let count = match self.openalex_work(keys).await? {
            Some(work) => work["cited_by_count"].as_i64().unwrap_or(0),
            None => 0,
        };
        Ok(CitationObservation {
            source: CitationProvider::OpenAlex,
            count,
            observed_on,
        })
    }

    async fn yearly_counts(&self, keys: &CitationKeys) -> Result<Vec<(i32, i64)>, RemoteError> {
        let Some(work) = self.openalex_work(keys).await? else {
            return Ok(Vec::new());
        };
        Ok(parse_counts_by_year(&work))
    }
}

/// Extract the yearly series from an OpenAlex work document, ascending by
/// year. Malformed entries are skipped.
fn parse_counts_by_year(work: &serde_json::Value) -> Vec<(i32, i64)> {
    let mut series: Vec<(i32, i64)> = work["counts_by_year"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let year = entry["year"].as_i64()? as i32;
                    let count = entry["cited_by_count"].as_i64()?;
                    Some((year, count))
                })
                .collect()
        })
        .unwrap_or_default();
    series.sort_by_key(|&(year, _)| year);
    series
}
