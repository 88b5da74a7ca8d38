//! Spatial cross-validation folds by nearest-neighbour distance matching.
//!
//! Observations are grouped into `k` folds so that the distances a
//! leave-fold-out fit has to bridge (observation → nearest observation in
//! another fold) are distributed like the distances the final map has to
//! bridge (prediction location → nearest observation). Candidate fold
//! layouts come from k-means clusterings of the observation coordinates at
//! increasing cluster counts, merged down to `k` folds, plus one random
//! layout; the candidate whose cross-fold distance ECDF is closest to the
//! prediction distance ECDF (Wasserstein-1) wins.
pub mod kmeans;
pub mod nnd;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};
use crate::geometry::{Point2, Polygon};
use kmeans::kmeans_labels;
use nnd::{cross_fold_distances, nearest_distances, wasserstein};

// ── Fold assignment ───────────────────────────────────────────────────────────

/// Fold membership plus explicit train/test index lists per fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folds {
    pub k: usize,
    /// Fold index of every observation.
    pub fold_of: Vec<usize>,
    /// Per fold: indices of observations in the other folds, ascending.
    pub train: Vec<Vec<usize>>,
    /// Per fold: indices of observations held out, ascending.
    pub test: Vec<Vec<usize>>,
}

impl Folds {
    /// Build train/test index lists from a fold label per observation.
    pub fn from_assignment(k: usize, fold_of: Vec<usize>) -> Result<Self> {
        if k < 2 {
            return Err(DbdError::InsufficientData(format!("k must be at least 2, got {k}")));
        }
        if let Some(&bad) = fold_of.iter().find(|&&f| f >= k) {
            return Err(DbdError::InvalidParameter(format!("fold label {bad} out of range for k = {k}")));
        }
        let mut train = vec![Vec::new(); k];
        let mut test = vec![Vec::new(); k];
        for (i, &f) in fold_of.iter().enumerate() {
            for (j, (tr, te)) in train.iter_mut().zip(test.iter_mut()).enumerate() {
                if j == f {
                    te.push(i);
                } else {
                    tr.push(i);
                }
            }
        }
        Ok(Self { k, fold_of, train, test })
    }

    pub fn n_points(&self) -> usize {
        self.fold_of.len()
    }

    pub fn fold_sizes(&self) -> Vec<usize> {
        self.test.iter().map(Vec::len).collect()
    }
}

// ── Parameters and diagnostics ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionParams {
    /// Number of folds, at least 2.
    pub k: usize,
    /// Prediction locations drawn from the domain polygon.
    pub sample_size: usize,
    /// Cluster counts tried between `k` and `n - 1`.
    pub n_candidates: usize,
    /// Largest share of observations a single fold may hold.
    pub max_fold_share: f64,
    pub seed: u64,
}

impl Default for PartitionParams {
    fn default() -> Self {
        Self { k: 5, sample_size: 1000, n_candidates: 10, max_fold_share: 0.5, seed: 42 }
    }
}

/// How the winning fold layout was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoldMethod {
    Clustered { clusters: usize },
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDiagnostics {
    pub method: FoldMethod,
    /// Wasserstein-1 distance between the two distance distributions.
    pub w_statistic: f64,
    /// Prediction location → nearest observation.
    pub prediction_distances: Vec<f64>,
    /// Observation → nearest observation in another fold.
    pub cv_distances: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub folds: Folds,
    pub diagnostics: PartitionDiagnostics,
}

// ── Partitioner ───────────────────────────────────────────────────────────────

pub struct SpatialBlockPartitioner {
    params: PartitionParams,
}

struct Candidate {
    method: FoldMethod,
    fold_of: Vec<usize>,
}

impl SpatialBlockPartitioner {
    pub fn new(params: PartitionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PartitionParams {
        &self.params
    }

    /// Assign `points` to `k` folds matched to prediction distances inside
    /// `domain`.
    pub fn partition(&self, points: &[Point2], domain: &Polygon) -> Result<Partition> {
        let p = &self.params;
        let n = points.len();
        if p.k < 2 {
            return Err(DbdError::InsufficientData(format!("k must be at least 2, got {}", p.k)));
        }
        if p.k > n {
            return Err(DbdError::InsufficientData(format!(
                "{} folds requested but only {n} observations available",
                p.k
            )));
        }
        domain.validate()?;

        let samples = domain.sample_uniform(p.sample_size.max(1), p.seed);
        if samples.is_empty() {
            return Err(DbdError::InsufficientData(
                "no prediction location could be sampled inside the domain polygon".into(),
            ));
        }
        let gij = nearest_distances(&samples, points);

        let candidates = self.candidates(points);
        let allowed_share = p.max_fold_share.max(n.div_ceil(p.k) as f64 / n as f64);

        let mut scored: Vec<(Candidate, Vec<f64>, f64, bool)> = Vec::with_capacity(candidates.len());
        for cand in candidates {
            let mut sizes = vec![0usize; p.k];
            for &f in &cand.fold_of {
                sizes[f] += 1;
            }
            // A fold without test points cannot be cross-validated.
            if sizes.iter().any(|&s| s == 0) {
                continue;
            }
            let balanced = sizes.iter().all(|&s| s as f64 / n as f64 <= allowed_share);
            let gj = cross_fold_distances(points, &cand.fold_of);
            let w = wasserstein(&gj, &gij);
            debug!("fold candidate {:?}: W = {w:.4}, sizes {sizes:?}", cand.method);
            scored.push((cand, gj, w, balanced));
        }

        let any_balanced = scored.iter().any(|s| s.3);
        let mut best: Option<(Candidate, Vec<f64>, f64)> = None;
        for (cand, gj, w, balanced) in scored {
            if any_balanced && !balanced {
                continue;
            }
            // Strict comparison keeps the earliest candidate on ties.
            if best.as_ref().map_or(true, |b| w < b.2) {
                best = Some((cand, gj, w));
            }
        }
        let Some((cand, gj, w)) = best else {
            return Err(DbdError::InsufficientData(format!(
                "no fold layout gives every one of the {} folds a test point",
                p.k
            )));
        };

        info!(
            "spatial folds: {:?} with W = {w:.4} ({} prediction samples)",
            cand.method,
            samples.len()
        );

        Ok(Partition {
            folds: Folds::from_assignment(p.k, cand.fold_of)?,
            diagnostics: PartitionDiagnostics {
                method: cand.method,
                w_statistic: w,
                prediction_distances: gij,
                cv_distances: gj,
            },
        })
    }

    /// Clustered candidates in ascending cluster count, then the random one.
    fn candidates(&self, points: &[Point2]) -> Vec<Candidate> {
        let p = &self.params;
        let n = points.len();
        let mut out: Vec<Candidate> = cluster_counts(p.k, n, p.n_candidates)
            .into_iter()
            .map(|q| {
                let labels = kmeans_labels(points, q, p.seed ^ 0xC1A5_7E25 ^ q as u64);
                Candidate {
                    method: FoldMethod::Clustered { clusters: q },
                    fold_of: merge_clusters(&labels, q, p.k),
                }
            })
            .collect();

        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(p.seed ^ 0x0F01_D5EE_D000_0001);
        order.shuffle(&mut rng);
        let mut fold_of = vec![0usize; n];
        for (pos, &i) in order.iter().enumerate() {
            fold_of[i] = pos % p.k;
        }
        out.push(Candidate { method: FoldMethod::Random, fold_of });
        out
    }
}

/// Evenly spaced cluster counts from `k` to `max(k, n - 1)`, deduplicated.
fn cluster_counts(k: usize, n: usize, n_candidates: usize) -> Vec<usize> {
    let hi = (n.saturating_sub(1)).max(k);
    let steps = n_candidates.max(1);
    if steps == 1 || hi == k {
        return vec![k];
    }
    let mut out: Vec<usize> = (0..steps)
        .map(|i| k + ((hi - k) as f64 * i as f64 / (steps - 1) as f64).round() as usize)
        .collect();
    out.dedup();
    out
}

/// Merge cluster labels into `k` folds: clusters are taken largest first
/// (ties: lower cluster id) and each goes to the currently smallest fold
/// (ties: lower fold index).
fn merge_clusters(labels: &[usize], q: usize, k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; q];
    for &l in labels {
        sizes[l] += 1;
    }
    let mut order: Vec<usize> = (0..q).filter(|&c| sizes[c] > 0).collect();
    order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));

    let mut fold_sizes = vec![0usize; k];
    let mut fold_of_cluster = vec![0usize; q];
    for c in order {
        let target = (0..k).min_by_key(|&f| (fold_sizes[f], f)).unwrap_or(0);
        fold_of_cluster[c] = target;
        fold_sizes[target] += sizes[c];
    }
    labels.iter().map(|&l| fold_of_cluster[l]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points(n_side: usize, spacing: f64) -> Vec<Point2> {
        let mut pts = Vec::new();
        for r in 0..n_side {
            for c in 0..n_side {
                pts.push(Point2::new(c as f64 * spacing, r as f64 * spacing));
            }
        }
        pts
    }

    fn assert_valid_folds(folds: &Folds, n: usize) {
        let mut seen = vec![0usize; n];
        for f in 0..folds.k {
            for &i in &folds.test[f] {
                seen[i] += 1;
                assert!(!folds.train[f].contains(&i), "index {i} in train and test of fold {f}");
            }
            assert_eq!(folds.train[f].len() + folds.test[f].len(), n);
            assert!(!folds.test[f].is_empty());
        }
        assert!(seen.iter().all(|&s| s == 1), "every index must be tested exactly once");
    }

    #[test]
    fn folds_are_disjoint_and_cover_every_point_for_all_k() {
        let pts = grid_points(4, 10.0);
        let domain = Polygon::rectangle(0.0, 0.0, 30.0, 30.0);
        for k in 2..=pts.len() {
            let params = PartitionParams { k, sample_size: 100, ..Default::default() };
            let part = SpatialBlockPartitioner::new(params).partition(&pts, &domain).unwrap();
            assert_eq!(part.folds.k, k);
            assert_valid_folds(&part.folds, pts.len());
        }
    }

    #[test]
    fn partition_is_deterministic_for_fixed_seed() {
        let pts = grid_points(5, 3.0);
        let domain = Polygon::rectangle(-5.0, -5.0, 40.0, 40.0);
        let partitioner = SpatialBlockPartitioner::new(PartitionParams { k: 4, ..Default::default() });
        let a = partitioner.partition(&pts, &domain).unwrap();
        let b = partitioner.partition(&pts, &domain).unwrap();
        assert_eq!(a.folds, b.folds);
        assert_eq!(a.diagnostics.w_statistic, b.diagnostics.w_statistic);
    }

    #[test]
    fn clustered_sample_in_wide_domain_prefers_spatial_blocks() {
        // Four tight clusters at the corners of a square; predictions are
        // wanted in the middle, far from every cluster, so folds should hold
        // out whole clusters rather than mix them randomly.
        let mut pts = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)] {
            for i in 0..5 {
                pts.push(Point2::new(cx + i as f64 * 0.5, cy + (i % 2) as f64 * 0.5));
            }
        }
        let domain = Polygon::rectangle(45.0, 45.0, 55.0, 55.0);
        let params = PartitionParams { k: 4, sample_size: 500, ..Default::default() };
        let part = SpatialBlockPartitioner::new(params).partition(&pts, &domain).unwrap();
        assert!(matches!(part.diagnostics.method, FoldMethod::Clustered { .. }));
        let random_like_w = {
            let fold_of: Vec<usize> = (0..pts.len()).map(|i| i % 4).collect();
            wasserstein(
                &cross_fold_distances(&pts, &fold_of),
                &part.diagnostics.prediction_distances,
            )
        };
        assert!(part.diagnostics.w_statistic < random_like_w);
    }

    #[test]
    fn too_many_folds_rejected() {
        let pts = grid_points(2, 1.0);
        let domain = Polygon::rectangle(0.0, 0.0, 1.0, 1.0);
        let params = PartitionParams { k: 5, ..Default::default() };
        let err = SpatialBlockPartitioner::new(params).partition(&pts, &domain).unwrap_err();
        assert!(matches!(err, DbdError::InsufficientData(_)));
    }

    #[test]
    fn degenerate_domain_rejected() {
        let pts = grid_points(3, 1.0);
        let domain = Polygon::new(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)]);
        let params = PartitionParams { k: 2, ..Default::default() };
        let err = SpatialBlockPartitioner::new(params).partition(&pts, &domain).unwrap_err();
        assert!(matches!(err, DbdError::InsufficientData(_)));
    }

    #[test]
    fn merge_balances_cluster_sizes() {
        // Cluster sizes 4, 3, 2, 1 → folds {c0, c3} and {c1, c2}.
        let labels = vec![0, 0, 0, 0, 1, 1, 1, 2, 2, 3];
        let folds = merge_clusters(&labels, 4, 2);
        let mut sizes = [0usize; 2];
        for &f in &folds {
            sizes[f] += 1;
        }
        assert_eq!(sizes, [5, 5]);
        // Members of one cluster always share a fold.
        assert!(folds[0..4].iter().all(|&f| f == folds[0]));
    }

    #[test]
    fn cluster_count_ladder_spans_k_to_n_minus_one() {
        assert_eq!(cluster_counts(3, 13, 5), vec![3, 5, 8, 10, 12]);
        assert_eq!(cluster_counts(4, 4, 10), vec![4]);
    }
}
