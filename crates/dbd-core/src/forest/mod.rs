//! Quantile regression forest.
//!
//! A bagged ensemble of [`QuantileTree`]s. Predictions pool the leaf
//! responses of every tree, each value weighted by `1 / (n_trees ×
//! leaf_size)`, and read the requested quantile off the weighted empirical
//! distribution, so one fitted ensemble answers any quantile.
pub mod tree;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DbdError, Result};
use crate::matrix::FeatureMatrix;
pub use tree::QuantileTree;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Features considered at each split.
    pub mtry: usize,
    /// Nodes with at most this many rows are not split.
    pub min_node_size: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self { n_trees: 500, mtry: 1, min_node_size: 5, seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileForest {
    feature_names: Vec<String>,
    params: ForestParams,
    trees: Vec<QuantileTree>,
    /// Permutation importance per feature (out-of-bag MSE increase, ≥ 0).
    importance: Vec<f64>,
}

struct GrownTree {
    tree: QuantileTree,
    /// Per-feature OOB MSE increase; None without out-of-bag rows.
    importance: Option<Vec<f64>>,
}

impl QuantileForest {
    /// Fit the ensemble on every row of `x`.
    pub fn fit(x: &FeatureMatrix, y: &[f64], params: ForestParams) -> Result<Self> {
        let n = x.n_rows();
        let p = x.n_cols();
        if n == 0 {
            return Err(DbdError::Training("training matrix has zero rows".into()));
        }
        if y.len() != n {
            return Err(DbdError::Training(format!("{} responses for {n} rows", y.len())));
        }
        if params.n_trees == 0 {
            return Err(DbdError::Training("n_trees must be at least 1".into()));
        }
        if params.mtry == 0 || params.mtry > p {
            return Err(DbdError::Training(format!(
                "mtry = {} outside 1..={p} available features",
                params.mtry
            )));
        }
        if y.iter().any(|v| !v.is_finite()) || (0..n).any(|i| x.row(i).iter().any(|v| !v.is_finite())) {
            return Err(DbdError::Training("training data contains missing values".into()));
        }

        let grown: Vec<GrownTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| grow_one(x, y, &params, t))
            .collect();

        let mut importance = vec![0.0; p];
        let mut counted = 0usize;
        for imp in grown.iter().filter_map(|g| g.importance.as_ref()) {
            for (acc, v) in importance.iter_mut().zip(imp) {
                *acc += v;
            }
            counted += 1;
        }
        for v in &mut importance {
            *v = if counted > 0 { (*v / counted as f64).max(0.0) } else { 0.0 };
        }

        Ok(Self {
            feature_names: x.names().to_vec(),
            params,
            trees: grown.into_iter().map(|g| g.tree).collect(),
            importance,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn importance(&self) -> &[f64] {
        &self.importance
    }

    /// Conditional quantile `q` for one feature row.
    pub fn predict_quantile(&self, row: &[f64], q: f64) -> f64 {
        self.predict_quantiles(row, &[q])[0]
    }

    /// Several conditional quantiles for one row from a single pooled
    /// leaf distribution.
    pub fn predict_quantiles(&self, row: &[f64], qs: &[f64]) -> Vec<f64> {
        let t = self.trees.len() as f64;
        let mut pooled: Vec<(f64, f64)> = Vec::new();
        for tree in &self.trees {
            let values = tree.leaf_values(row);
            if values.is_empty() {
                continue;
            }
            let w = 1.0 / (t * values.len() as f64);
            pooled.extend(values.iter().map(|&v| (v, w)));
        }
        weighted_quantiles(&mut pooled, qs)
    }

    /// Quantile `q` for every row of `x`, in parallel over rows.
    pub fn predict_matrix(&self, x: &FeatureMatrix, q: f64) -> Vec<f64> {
        (0..x.n_rows())
            .into_par_iter()
            .map(|i| self.predict_quantile(x.row(i), q))
            .collect()
    }
}

fn grow_one(x: &FeatureMatrix, y: &[f64], params: &ForestParams, t: usize) -> GrownTree {
    let n = x.n_rows();
    let mut rng = StdRng::seed_from_u64(params.seed ^ (t as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));

    let mut in_bag = vec![false; n];
    let rows: Vec<usize> = (0..n)
        .map(|_| {
            let i = rng.gen_range(0..n);
            in_bag[i] = true;
            i
        })
        .collect();
    let tree = QuantileTree::grow(x, y, rows, params.mtry, params.min_node_size, &mut rng);

    let oob: Vec<usize> = (0..n).filter(|&i| !in_bag[i]).collect();
    let importance = (!oob.is_empty()).then(|| oob_importance(&tree, x, y, &oob, &mut rng));
    GrownTree { tree, importance }
}

/// MSE increase on the out-of-bag rows when each feature column is
/// permuted among them.
fn oob_importance(tree: &QuantileTree, x: &FeatureMatrix, y: &[f64], oob: &[usize], rng: &mut StdRng) -> Vec<f64> {
    let mse = |rows: &[Vec<f64>]| -> f64 {
        rows.iter()
            .zip(oob)
            .map(|(r, &i)| (tree.predict_mean(r) - y[i]).powi(2))
            .sum::<f64>()
            / oob.len() as f64
    };
    let base_rows: Vec<Vec<f64>> = oob.iter().map(|&i| x.row(i).to_vec()).collect();
    let base = mse(&base_rows);

    (0..x.n_cols())
        .map(|j| {
            let mut column: Vec<f64> = base_rows.iter().map(|r| r[j]).collect();
            column.shuffle(&mut *rng);
            let permuted: Vec<Vec<f64>> = base_rows
                .iter()
                .zip(&column)
                .map(|(r, &v)| {
                    let mut r = r.clone();
                    r[j] = v;
                    r
                })
                .collect();
            mse(&permuted) - base
        })
        .collect()
}

/// Weighted empirical quantiles: for each `q`, the smallest value whose
/// cumulative weight reaches `q` of the total.
pub fn weighted_quantiles(pooled: &mut [(f64, f64)], qs: &[f64]) -> Vec<f64> {
    if pooled.is_empty() {
        return vec![f64::NAN; qs.len()];
    }
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = pooled.iter().map(|p| p.1).sum();

    qs.iter()
        .map(|&q| {
            let target = q.clamp(0.0, 1.0) * total;
            let mut cum = 0.0;
            for &(v, w) in pooled.iter() {
                cum += w;
                if cum >= target - 1e-12 * total {
                    return v;
                }
            }
            pooled[pooled.len() - 1].0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_data(n: usize) -> (FeatureMatrix, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64, ((i * 7) % 5) as f64]).collect();
        let y: Vec<f64> = (0..n).map(|i| 3.0 * i as f64).collect();
        (FeatureMatrix::from_rows(vec!["signal".into(), "noise".into()], &rows).unwrap(), y)
    }

    #[test]
    fn constant_response_predicts_the_constant() {
        let (x, _) = linear_data(30);
        let y = vec![1.7; 30];
        let params = ForestParams { n_trees: 50, mtry: 2, ..Default::default() };
        let forest = QuantileForest::fit(&x, &y, params).unwrap();
        for i in 0..x.n_rows() {
            for q in [0.05, 0.5, 0.95] {
                assert_eq!(forest.predict_quantile(x.row(i), q), 1.7);
            }
        }
    }

    #[test]
    fn median_tracks_training_response() {
        let (x, y) = linear_data(60);
        let params = ForestParams { n_trees: 100, mtry: 1, ..Default::default() };
        let forest = QuantileForest::fit(&x, &y, params).unwrap();
        let preds = forest.predict_matrix(&x, 0.5);
        let mean_pred = preds.iter().sum::<f64>() / preds.len() as f64;
        let mean_y = y.iter().sum::<f64>() / y.len() as f64;
        assert!((mean_pred - mean_y).abs() < 0.1 * mean_y, "{mean_pred} vs {mean_y}");
    }

    #[test]
    fn quantiles_are_ordered() {
        let (x, y) = linear_data(40);
        let forest = QuantileForest::fit(&x, &y, ForestParams { n_trees: 60, mtry: 2, ..Default::default() }).unwrap();
        for i in 0..x.n_rows() {
            let q = forest.predict_quantiles(x.row(i), &[0.05, 0.5, 0.95]);
            assert!(q[0] <= q[1] && q[1] <= q[2], "{q:?}");
        }
    }

    #[test]
    fn signal_feature_more_important_than_noise() {
        let (x, y) = linear_data(60);
        let forest = QuantileForest::fit(&x, &y, ForestParams { n_trees: 100, mtry: 2, ..Default::default() }).unwrap();
        let imp = forest.importance();
        assert!(imp[0] > imp[1], "importance {imp:?}");
        assert!(imp.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn fit_is_deterministic() {
        let (x, y) = linear_data(25);
        let params = ForestParams { n_trees: 20, mtry: 1, ..Default::default() };
        let a = QuantileForest::fit(&x, &y, params).unwrap();
        let b = QuantileForest::fit(&x, &y, params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_parameters_rejected() {
        let (x, y) = linear_data(10);
        let too_many = ForestParams { mtry: 3, ..Default::default() };
        assert!(matches!(QuantileForest::fit(&x, &y, too_many), Err(DbdError::Training(_))));

        let empty = FeatureMatrix::new(vec!["a".into()], vec![]).unwrap();
        assert!(matches!(
            QuantileForest::fit(&empty, &[], ForestParams::default()),
            Err(DbdError::Training(_))
        ));
    }

    #[test]
    fn weighted_quantile_picks_cumulative_crossing() {
        let mut pooled = vec![(3.0, 0.25), (1.0, 0.25), (2.0, 0.5)];
        let q = weighted_quantiles(&mut pooled, &[0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_relative_eq!(q[0], 1.0);
        assert_relative_eq!(q[1], 1.0);
        assert_relative_eq!(q[2], 2.0);
        assert_relative_eq!(q[3], 2.0);
        assert_relative_eq!(q[4], 3.0);
    }
}
