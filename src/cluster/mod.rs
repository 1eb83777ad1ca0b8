//! Cluster maintenance over the article-vector population.
//!
//! Each pass relabels the full population from scratch: vectors are
//! L2-normalized, pushed through a seeded random projection, and grouped
//! by density. Noise keeps label -1 on the vector row and is never stored
//! as a cluster. Cluster rows carry the centroid of the original
//! (unprojected) member vectors, the member count, and the mean forward
//! citation slope of the members.
//!
//! The projection is the only randomized step; fixing the seed makes two
//! passes over the same population produce identical labelings.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::errors::StoreResult;
use crate::store::{ClusterRow, Store};
use crate::trajectory::forward_citation_slope;

/// Outcome of one clustering pass.
#[derive(Debug, Clone, Copy)]
pub struct ClusterPassSummary {
    pub population: usize,
    pub clusters: usize,
    pub noise: usize,
}

pub struct ClusterManager {
    store: Arc<dyn Store>,
    config: ClusterConfig,
}

impl ClusterManager {
    pub fn new(store: Arc<dyn Store>, config: ClusterConfig) -> Self {
        Self { store, config }
    }

    /// Relabel the whole population and rebuild the cluster rows.
    pub async fn run_pass(&self) -> StoreResult<ClusterPassSummary> {
        let start = Instant::now();
        let vectors = self.store.all_vectors().await?;
        let population = vectors.len();

        if population < self.config.min_cluster_size {
            let assignments: Vec<(i64, i32)> =
                vectors.iter().map(|v| (v.article_id, -1)).collect();
            self.store.set_cluster_labels(&assignments).await?;
            self.store.delete_clusters_except(&[]).await?;
            debug!(population, "population below min cluster size, all noise");
            return Ok(ClusterPassSummary {
                population,
                clusters: 0,
                noise: population,
            });
        }

        let data: Vec<&[f32]> = vectors.iter().map(|v| v.vector.as_slice()).collect();
        let labels = label_population(&data, &self.config);

        let assignments: Vec<(i64, i32)> = vectors
            .iter()
            .zip(labels.iter())
            .map(|(v, &label)| (v.article_id, label))
            .collect();
        self.store.set_cluster_labels(&assignments).await?;

        let cluster_count = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0));
        let mut kept_labels = Vec::with_capacity(cluster_count as usize);
        for label in 0..cluster_count {
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l == label)
                .map(|(i, _)| i)
                .collect();

            let centroid = centroid_of(&members, &data);

            let mut slopes = Vec::with_capacity(members.len());
            for &idx in &members {
                let series = self.store.yearly_citations(vectors[idx].article_id).await?;
                slopes.push(forward_citation_slope(&series));
            }
            let velocity = slopes.iter().sum::<f64>() / slopes.len().max(1) as f64;

            self.store
                .upsert_cluster(&ClusterRow {
                    label,
                    centroid,
                    size: members.len() as i64,
                    velocity,
                    last_updated: Utc::now(),
                })
                .await?;
            kept_labels.push(label);
        }
        self.store.delete_clusters_except(&kept_labels).await?;

        let noise = labels.iter().filter(|&&l| l == -1).count();
        metrics::histogram!("primetime_clustering_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        info!(
            population,
            clusters = kept_labels.len(),
            noise,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "clustering pass complete"
        );

        Ok(ClusterPassSummary {
            population,
            clusters: kept_labels.len(),
            noise,
        })
    }
}

/// Label a vector population. Returns one label per input vector, -1 for
/// noise, clusters numbered 0.. by first appearance in input order.
pub(crate) fn label_population(vectors: &[&[f32]], config: &ClusterConfig) -> Vec<i32> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }

    let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| l2_normalized(v)).collect();
    let projected = project(&normalized, config.projection_dim, config.random_seed);

    let eps = density_radius(&projected, config.n_neighbors);
    let mut labels = dbscan(&projected, eps, config.min_cluster_size);

    suppress_small_clusters(&mut labels, config.min_cluster_size);
    renumber(&mut labels);
    labels
}

fn l2_normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Seeded uniform random projection to `target_dim`. A no-op when the
/// input is already at or below the target dimensionality.
fn project(vectors: &[Vec<f32>], target_dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let source_dim = vectors[0].len();
    if source_dim <= target_dim {
        return vectors.to_vec();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let scale = 1.0 / (target_dim as f32).sqrt();
    let weights: Vec<Vec<f32>> = (0..source_dim)
        .map(|_| {
            (0..target_dim)
                .map(|_| rng.gen_range(-1.0f32..1.0) * scale)
                .collect()
        })
        .collect();

    vectors
        .iter()
        .map(|v| {
            let mut out = vec![0.0f32; target_dim];
            for (value, row) in v.iter().zip(weights.iter()) {
                for (o, w) in out.iter_mut().zip(row.iter()) {
                    *o += value * w;
                }
            }
            out
        })
        .collect()
}

/// Density radius: mean distance to the k-th nearest neighbor across the
/// population. Derived from the data so the only tunables stay
/// `min_cluster_size` and `n_neighbors`.
fn density_radius(points: &[Vec<f32>], n_neighbors: usize) -> f32 {
    let n = points.len();
    let k = n_neighbors.clamp(1, n.saturating_sub(1).max(1));

    let mut total = 0.0f32;
    for (i, point) in points.iter().enumerate() {
        let mut dists: Vec<f32> = points
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, other)| euclidean(point, other))
            .collect();
        dists.sort_by(|a, b| a.partial_cmp(b).expect("distances are finite"));
        total += dists.get(k - 1).copied().unwrap_or(0.0);
    }
    total / n as f32
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

const UNVISITED: i32 = -2;
const NOISE: i32 = -1;

/// Classic density clustering: core points have at least `min_points`
/// neighbors within `eps`; clusters grow by flooding through core points.
/// Fully deterministic for a fixed input order.
fn dbscan(points: &[Vec<f32>], eps: f32, min_points: usize) -> Vec<i32> {
    let n = points.len();
    let mut labels = vec![UNVISITED; n];
    let mut next_label = 0;

    let region = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| euclidean(&points[i], &points[j]) <= eps)
            .collect()
    };

    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }
        let neighbors = region(i);
        if neighbors.len() < min_points {
            labels[i] = NOISE;
            continue;
        }

        labels[i] = next_label;
        let mut queue = neighbors;
        let mut cursor = 0;
        while cursor < queue.len() {
            let j = queue[cursor];
            cursor += 1;

            if labels[j] == NOISE {
                labels[j] = next_label;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = next_label;

            let reachable = region(j);
            if reachable.len() >= min_points {
                queue.extend(reachable);
            }
        }
        next_label += 1;
    }
    labels
}

/// Demote clusters with fewer than `min_size` members back to noise.
fn suppress_small_clusters(labels: &mut [i32], min_size: usize) {
    let max_label = labels.iter().copied().max().unwrap_or(-1);
    for label in 0..=max_label {
        let count = labels.iter().filter(|&&l| l == label).count();
        if count < min_size {
            for l in labels.iter_mut() {
                if *l == label {
                    *l = NOISE;
                }
            }
        }
    }
}

/// Renumber cluster labels to 0.. by first appearance in input order.
fn renumber(labels: &mut [i32]) {
    let mut mapping: Vec<(i32, i32)> = Vec::new();
    for label in labels.iter_mut() {
        if *label < 0 {
            continue;
        }
        let mapped = match mapping.iter().find(|(old, _)| old == label) {
            Some(&(_, new)) => new,
            None => {
                let new = mapping.len() as i32;
                mapping.push((*label, new));
                new
            }
        };
        *label = mapped;
    }
}

fn centroid_of(members: &[usize], data: &[&[f32]]) -> Vec<f32> {
    let dim = data.first().map(|v| v.len()).unwrap_or(0);
    let mut centroid = vec![0.0f32; dim];
    for &idx in members {
        for (c, v) in centroid.iter_mut().zip(data[idx].iter()) {
            *c += v;
        }
    }
    let count = members.len().max(1) as f32;
    for c in &mut centroid {
        *c /= count;
    }
    centroid
}
