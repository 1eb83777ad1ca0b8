//! Opportunity scoring.
//!
//! For one search this computes three raw components — semantic novelty,
//! citation velocity, recency — then replaces each with its empirical-CDF
//! position within the history of previous searches, and combines them
//! into the overall score. Percentile normalization is the contract here:
//! it is robust to outliers and needs no tuning parameter, which min-max
//! scaling cannot offer.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, NaiveDate, Utc};
use tracing::info;

use crate::config::ScoringConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::store::{ArticleVectorRow, ScoreUpdate, Store};
use crate::trajectory::forward_citation_slope;

/// Raw and normalized components of one scoring run.
#[derive(Debug, Clone, Copy)]
pub struct ScoreBreakdown {
    pub novelty_raw: f64,
    pub citation_raw: f64,
    pub recency_raw: f64,
    pub novelty: f64,
    pub citation_velocity: f64,
    pub recency: f64,
    pub overall: f64,
}

pub struct ScoreService {
    store: Arc<dyn Store>,
    config: ScoringConfig,
}

impl ScoreService {
    pub fn new(store: Arc<dyn Store>, config: ScoringConfig) -> Self {
        Self { store, config }
    }

    /// Score one search and persist the result. Idempotent: re-running
    /// overwrites the score row and appends a fresh history row.
    pub async fn score_search(&self, search_id: i64) -> PipelineResult<ScoreBreakdown> {
        let start = Instant::now();
        self.store
            .get_search(search_id)
            .await?
            .ok_or(PipelineError::SearchNotFound(search_id))?;

        let articles = self.store.articles_of_search(search_id).await?;
        let vectors = self.store.vectors_of_search(search_id).await?;
        let all_vectors = self.store.all_vectors().await?;

        let novelty_raw = novelty_raw(&vectors, &all_vectors);

        let mut slopes = Vec::with_capacity(articles.len());
        for article in &articles {
            let series = self.store.yearly_citations(article.id).await?;
            slopes.push(forward_citation_slope(&series));
        }
        let citation_raw = velocity_raw(&slopes);

        let pub_dates: Vec<Option<NaiveDate>> = articles.iter().map(|a| a.pub_date).collect();
        let recency_raw = recency_raw(&pub_dates, self.config.recency_tau_years, current_year());

        let history = self.store.raw_score_history().await?;
        let novelty_history: Vec<f64> = history.iter().map(|h| h.novelty_raw).collect();
        let citation_history: Vec<f64> = history.iter().map(|h| h.citation_raw).collect();
        let recency_history: Vec<f64> = history.iter().map(|h| h.recency_raw).collect();

        let novelty = empirical_cdf(novelty_raw, &novelty_history);
        let citation_velocity = empirical_cdf(citation_raw, &citation_history);
        let recency = empirical_cdf(recency_raw, &recency_history);

        let overall = (self.config.novelty_weight * novelty
            + self.config.velocity_weight * citation_velocity
            + self.config.recency_weight * recency)
            .clamp(0.0, 1.0);

        let breakdown = ScoreBreakdown {
            novelty_raw,
            citation_raw,
            recency_raw,
            novelty,
            citation_velocity,
            recency,
            overall,
        };

        self.store
            .put_score(
                search_id,
                &ScoreUpdate {
                    novelty,
                    citation_velocity,
                    recency,
                    overall,
                    novelty_raw,
                    citation_raw,
                    recency_raw,
                },
            )
            .await?;

        metrics::counter!("primetime_scores_computed_total").increment(1);
        metrics::histogram!("primetime_scoring_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        info!(
            search_id,
            novelty, citation_velocity, recency, overall, "opportunity score persisted"
        );

        Ok(breakdown)
    }
}

fn current_year() -> i32 {
    Utc::now().year()
}

/// Mean nearest-neighbor cosine distance from each vector of the search
/// to the closest vector outside it. Higher means more semantically
/// isolated. Degenerate searches (fewer than two vectors, or nothing
/// outside them) score 1.0.
pub(crate) fn novelty_raw(search_vectors: &[ArticleVectorRow], all: &[ArticleVectorRow]) -> f64 {
    if search_vectors.len() < 2 {
        return 1.0;
    }
    let member_ids: Vec<i64> = search_vectors.iter().map(|v| v.article_id).collect();
    let complement: Vec<&ArticleVectorRow> = all
        .iter()
        .filter(|v| !member_ids.contains(&v.article_id))
        .collect();
    if complement.is_empty() {
        return 1.0;
    }

    let total: f64 = search_vectors
        .iter()
        .map(|member| {
            complement
                .iter()
                .map(|other| cosine_distance(&member.vector, &other.vector))
                .fold(f64::INFINITY, f64::min)
        })
        .sum();
    total / search_vectors.len() as f64
}

/// Mean forward citation slope over the search, clipped below at zero.
pub(crate) fn velocity_raw(slopes: &[f64]) -> f64 {
    if slopes.is_empty() {
        return 0.0;
    }
    let mean = slopes.iter().sum::<f64>() / slopes.len() as f64;
    mean.max(0.0)
}

/// Mean exponential age decay over the search. Articles without a
/// publication date contribute zero but stay in the denominator.
pub(crate) fn recency_raw(pub_dates: &[Option<NaiveDate>], tau_years: f64, now_year: i32) -> f64 {
    if pub_dates.is_empty() {
        return 0.0;
    }
    let total: f64 = pub_dates
        .iter()
        .map(|date| match date {
            Some(date) => {
                let age_years = (now_year - date.year()).max(0) as f64;
                (-age_years / tau_years).exp()
            }
            None => 0.0,
        })
        .sum();
    total / pub_dates.len() as f64
}

/// Empirical CDF position of `x` against the component history, with `x`
/// itself appended first so at least one sample always exists.
pub(crate) fn empirical_cdf(x: f64, history: &[f64]) -> f64 {
    let at_or_below = history.iter().filter(|&&v| v <= x).count() + 1;
    let total = history.len() + 1;
    (at_or_below as f64 / total as f64).clamp(0.0, 1.0)
}

/// Cosine distance in [0, 2]. A zero vector is maximally distant from
/// everything (distance 1).
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_row(article_id: i64, vector: Vec<f32>) -> ArticleVectorRow {
        ArticleVectorRow {
            article_id,
            vector,
            cluster_label: None,
        }
    }

    #[test]
    fn cosine_distance_basics() {
        assert!((cosine_distance(&[1.0, 0.0], &[1.0, 0.0])).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-9);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn novelty_degenerate_cases() {
        let a = vector_row(1, vec![1.0, 0.0]);
        let b = vector_row(2, vec![0.0, 1.0]);

        // Fewer than two members.
        assert_eq!(novelty_raw(&[a.clone()], &[a.clone(), b.clone()]), 1.0);
        assert_eq!(novelty_raw(&[], &[]), 1.0);

        // Empty complement: the search is the whole corpus.
        assert_eq!(
            novelty_raw(&[a.clone(), b.clone()], &[a.clone(), b.clone()]),
            1.0
        );
    }

    #[test]
    fn novelty_is_mean_nearest_neighbor_distance() {
        let members = vec![vector_row(1, vec![1.0, 0.0]), vector_row(2, vec![0.0, 1.0])];
        let mut all = members.clone();
        all.push(vector_row(3, vec![1.0, 0.0]));

        // Member 1 sits on the outside vector (distance 0); member 2 is
        // orthogonal to it (distance 1).
        let novelty = novelty_raw(&members, &all);
        assert!((novelty - 0.5).abs() < 1e-9);
    }

    #[test]
    fn velocity_is_clipped_mean() {
        assert_eq!(velocity_raw(&[]), 0.0);
        assert!((velocity_raw(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-9);
        assert_eq!(velocity_raw(&[-5.0, 1.0]), 0.0);
    }

    #[test]
    fn recency_decay() {
        let now_year = 2025;
        let date = |y| NaiveDate::from_ymd_opt(y, 6, 1);

        // Publication this year contributes 1.0.
        assert!((recency_raw(&[date(2025)], 5.0, now_year) - 1.0).abs() < 1e-9);

        // Missing dates contribute zero but count in the mean.
        let mixed = [date(2025), None];
        assert!((recency_raw(&mixed, 5.0, now_year) - 0.5).abs() < 1e-9);

        assert_eq!(recency_raw(&[], 5.0, now_year), 0.0);
    }

    #[test]
    fn recency_matches_exponential_form() {
        let now_year = 2025;
        let dates = [
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2021, 1, 1),
        ];
        let expected = ((-1.0f64 / 5.0).exp() * 2.0 + (-4.0f64 / 5.0).exp()) / 3.0;
        assert!((recency_raw(&dates, 5.0, now_year) - expected).abs() < 1e-9);
    }

    #[test]
    fn cdf_with_empty_history_is_one() {
        assert_eq!(empirical_cdf(0.123, &[]), 1.0);
    }

    #[test]
    fn cdf_ranks_against_history() {
        let history: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let normalized = empirical_cdf(0.5, &history);
        assert!((normalized - 0.5).abs() < 0.02);

        assert!((empirical_cdf(2.0, &history) - 1.0).abs() < 1e-9);
        let bottom = empirical_cdf(-1.0, &history);
        assert!(bottom > 0.0 && bottom < 0.02);
    }

    #[test]
    fn cdf_mean_over_identical_distribution_is_centered() {
        // Ranking each sample of a history against the others averages to
        // about one half.
        let history: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let mean: f64 = history
            .iter()
            .map(|&x| {
                let rest: Vec<f64> = history.iter().copied().filter(|&v| v != x).collect();
                empirical_cdf(x, &rest)
            })
            .sum::<f64>()
            / history.len() as f64;
        assert!((mean - 0.5).abs() < 0.05);
    }
}
