//! PubMed bibliographic client.
//!
//! Uses the NCBI E-utilities:
//!   esearch.fcgi (JSON) resolves the query expression to a relevance-ranked
//!   PMID list; efetch.fcgi (rettype=medline) returns the records, which are
//!   parsed by a pure Medline-format parser below.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use crate::config::PubmedConfig;
use crate::errors::RemoteError;

use super::{classify_status, classify_transport, ArticleRecord, BibliographicSource, DateRange};

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

pub struct PubMedClient {
    client: reqwest::Client,
    config: PubmedConfig,
}

impl PubMedClient {
    pub fn new(config: PubmedConfig, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/0.1 (mailto:{})", config.tool, config.email))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client, config }
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("tool", self.config.tool.clone()),
            ("email", self.config.email.clone()),
        ];
        if let Some(key) = &self.config.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn esearch(
        &self,
        query: &str,
        max_results: usize,
        date_range: Option<&DateRange>,
    ) -> Result<Vec<String>, RemoteError> {
        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("term", query.to_string()));
        params.push(("retmax", max_results.to_string()));
        params.push(("sort", "relevance".to_string()));
        params.push(("retmode", "json".to_string()));
        if let Some(range) = date_range {
            params.push(("datetype", "pdat".to_string()));
            params.push(("mindate", range.start.format("%Y/%m/%d").to_string()));
            params.push(("maxdate", range.end.format("%Y/%m/%d").to_string()));
        }

        let response = self
            .client
            .get(format!("{EUTILS_BASE}/esearch.fcgi"))
            .query(&params)
            .send()
            .await
            .map_err(classify_transport)?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "pubmed esearch"));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Permanent(format!("pubmed esearch: invalid JSON: {e}")))?;
        let ids = body["esearchresult"]["idlist"]
            .as_array()
            .ok_or_else(|| RemoteError::Permanent("pubmed esearch: missing idlist".into()))?;

        Ok(ids
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect())
    }

    async fn efetch_medline(&self, pmids: &[String]) -> Result<String, RemoteError> {
        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "medline".to_string()));
        params.push(("retmode", "text".to_string()));

        let response = self
            .client
            .get(format!("{EUTILS_BASE}/efetch.fcgi"))
            .query(&params)
            .send()
            .await
            .map_err(classify_transport)?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "pubmed efetch"));
        }
        response.text().await.map_err(classify_transport)
    }
}

#[async_trait]
impl BibliographicSource for PubMedClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        date_range: Option<&DateRange>,
    ) -> Result<Vec<ArticleRecord>, RemoteError> {
        let pmids = self.esearch(query, max_results, date_range).await?;
        debug!(hits = pmids.len(), "pubmed esearch complete");
        if pmids.is_empty() {
            return Ok(Vec::new());
        }

        let medline = self.efetch_medline(&pmids).await?;
        let mut by_pmid: HashMap<String, ArticleRecord> = parse_medline(&medline)
            .into_iter()
            .map(|r| (r.pmid.clone(), r))
            .collect();

        // efetch does not promise ordering; re-impose the relevance rank.
        Ok(pmids.iter().filter_map(|id| by_pmid.remove(id)).collect())
    }
}

/// Parse a batch of Medline-format records into article records.
///
/// The format is line-oriented: a four-character tag, a dash, then the
/// value; continuation lines are indented with six spaces; records are
/// separated by blank lines. Records without a PMID are dropped.
pub fn parse_medline(text: &str) -> Vec<ArticleRecord> {
    let mut records = Vec::new();
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    let mut last_tag: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            if let Some(record) = record_from_fields(&fields) {
                records.push(record);
            }
            fields.clear();
            last_tag = None;
            continue;
        }

        // Tag lines look like "PMID- 1234" / "TI  - Title"; continuation
        // lines are indented six spaces and extend the previous value.
        let bytes = line.as_bytes();
        if bytes.len() >= 6 && bytes[4] == b'-' && bytes[5] == b' ' {
            let tag = line[..4].trim().to_string();
            fields
                .entry(tag.clone())
                .or_default()
                .push(line[6..].trim().to_string());
            last_tag = Some(tag);
        } else if let Some(continuation) = line.strip_prefix("      ") {
            if let Some(values) = last_tag.as_ref().and_then(|tag| fields.get_mut(tag)) {
                if let Some(current) = values.last_mut() {
                    current.push(' ');
                    current.push_str(continuation.trim());
                }
            }
        }
    }
    if let Some(record) = record_from_fields(&fields) {
        records.push(record);
    }
    records
}

fn record_from_fields(fields: &HashMap<String, Vec<String>>) -> Option<ArticleRecord> {
    let pmid = fields.get("PMID")?.first()?.clone();
    if pmid.is_empty() {
        return None;
    }

    let first = |tag: &str| -> Option<String> { fields.get(tag)?.first().cloned() };

    Some(ArticleRecord {
        pmid,
        title: first("TI").unwrap_or_default(),
        abstract_text: first("AB"),
        journal: first("JT"),
        pub_date: first("DP").as_deref().and_then(parse_pub_date),
        doi: extract_doi(fields),
        authors: fields.get("FAU").cloned().unwrap_or_default(),
    })
}

/// DOI lives in the LID field as a `10.…` token, or in an AID entry
/// tagged `[doi]`.
fn extract_doi(fields: &HashMap<String, Vec<String>>) -> Option<String> {
    if let Some(lids) = fields.get("LID") {
        for lid in lids {
            if let Some(token) = lid.split_whitespace().find(|t| t.starts_with("10.")) {
                return Some(token.to_string());
            }
        }
    }
    if let Some(aids) = fields.get("AID") {
        for aid in aids {
            if let Some(doi) = aid.strip_suffix("[doi]") {
                return Some(doi.trim().to_string());
            }
        }
    }
    None
}

/// Parse the publication-date formats PubMed actually emits:
/// `2023 Jan 15`, `2023 Jan`, `2023`, `2023-01-15`. Month and day default
/// to January 1st; anything else is `None`, never "today".
pub fn parse_pub_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y %b %d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{raw} 1"), "%Y %b %d") {
        return Some(date);
    }
    // Seasonal or ranged dates ("2023 Spring", "2023 Jan-Feb"): keep the year.
    let year_token = raw.split_whitespace().next()?;
    if year_token.len() == 4 {
        if let Ok(year) = year_token.parse::<i32>() {
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
PMID- 36038629
TI  - CRISPR-based therapy for sickle cell disease: a phase 1
      interim analysis.
AB  - Gene editing of autologous stem cells shows durable fetal
      hemoglobin induction.
FAU - Doe, Jane
FAU - Smith, John
JT  - The New England Journal of Medicine
DP  - 2023 Jan 15
LID - 10.1056/NEJMoa2031054 [doi]

PMID- 34599000
TI  - Lentiviral gene therapy outcomes.
AID - 10.1182/blood.2021011000 [doi]
DP  - 2021
";

    #[test]
    fn parses_multiple_records() {
        let records = parse_medline(SAMPLE);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pmid, "36038629");
        assert_eq!(records[1].pmid, "34599000");
    }

    #[test]
    fn continuation_lines_extend_values() {
        let records = parse_medline(SAMPLE);
        assert_eq!(
            records[0].title,
            "CRISPR-based therapy for sickle cell disease: a phase 1 interim analysis."
        );
        assert!(records[0]
            .abstract_text
            .as_deref()
            .unwrap()
            .contains("fetal hemoglobin"));
    }

    #[test]
    fn doi_from_lid_and_aid() {
        let records = parse_medline(SAMPLE);
        assert_eq!(records[0].doi.as_deref(), Some("10.1056/NEJMoa2031054"));
        assert_eq!(records[1].doi.as_deref(), Some("10.1182/blood.2021011000"));
    }

    #[test]
    fn authors_in_order() {
        let records = parse_medline(SAMPLE);
        assert_eq!(records[0].authors, vec!["Doe, Jane", "Smith, John"]);
    }

    #[test]
    fn records_without_pmid_are_dropped() {
        let records = parse_medline("TI  - orphan title\n\n");
        assert!(records.is_empty());
    }

    #[test]
    fn date_formats() {
        assert_eq!(
            parse_pub_date("2023 Jan 15"),
            NaiveDate::from_ymd_opt(2023, 1, 15)
        );
        assert_eq!(
            parse_pub_date("2023 Mar"),
            NaiveDate::from_ymd_opt(2023, 3, 1)
        );
        assert_eq!(parse_pub_date("2023"), NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(
            parse_pub_date("2021-06-30"),
            NaiveDate::from_ymd_opt(2021, 6, 30)
        );
        assert_eq!(
            parse_pub_date("2023 Spring"),
            NaiveDate::from_ymd_opt(2023, 1, 1)
        );
        assert_eq!(parse_pub_date(""), None);
        assert_eq!(parse_pub_date("unknown"), None);
    }
}
