//! Forward feature selection under spatial cross-validation.
//!
//! Starting from the empty subset, every round tries each unused feature
//! with each admissible mtry, scores the candidate by k-fold spatial CV R²
//! of the pooled 0.5-quantile predictions, and keeps the round's best only
//! if it beats the best R² ever accepted. The first round that fails to do
//! so ends the search.
pub mod metrics;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::worker_pool;
use crate::error::{DbdError, Result};
use crate::forest::{ForestParams, QuantileForest};
use crate::matrix::FeatureMatrix;
use crate::model::SelectedModel;
use crate::partition::Folds;
use metrics::CvMetrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionParams {
    /// mtry values tried per candidate; clipped to the subset size.
    pub mtry_grid: Vec<usize>,
    pub n_trees: usize,
    pub min_node_size: usize,
    /// R² the first round has to beat for the result to count as validated.
    pub baseline_r2: f64,
    pub seed: u64,
    /// Worker threads; None uses all cores but one.
    pub threads: Option<usize>,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            mtry_grid: vec![1, 2, 3],
            n_trees: 500,
            min_node_size: 5,
            baseline_r2: 0.0,
            seed: 42,
            threads: None,
        }
    }
}

/// One round of the search: its best candidate and whether it was kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub feature: String,
    pub mtry: usize,
    #[serde(with = "metrics::nan_as_null")]
    pub r2: f64,
    #[serde(with = "metrics::nan_as_null")]
    pub rmse: f64,
    #[serde(with = "metrics::nan_as_null")]
    pub me: f64,
    pub accepted: bool,
    /// Forest fits in this round (candidates × folds).
    pub models_evaluated: usize,
}

#[derive(Debug)]
pub struct Selection {
    pub model: SelectedModel,
    pub history: Vec<RoundRecord>,
    /// Forest fits performed across all rounds (candidates × folds).
    pub models_evaluated: usize,
    /// Set when selection could not beat the baseline; the model is then
    /// the best single feature, marked unvalidated.
    pub warning: Option<DbdError>,
}

#[derive(Debug, Clone)]
struct Scored {
    feature: String,
    mtry: usize,
    metrics: CvMetrics,
}

pub struct ForwardFeatureSelector {
    params: SelectionParams,
}

impl ForwardFeatureSelector {
    pub fn new(params: SelectionParams) -> Self {
        Self { params }
    }

    /// Run the greedy search over `features` (columns of `x`) on a pool
    /// sized by `SelectionParams::threads`.
    pub fn select(&self, features: &[String], x: &FeatureMatrix, y: &[f64], folds: &Folds) -> Result<Selection> {
        worker_pool(self.params.threads)?.install(|| self.search(features, x, y, folds))
    }

    /// The search itself, on whichever rayon pool is current.
    pub(crate) fn search(&self, features: &[String], x: &FeatureMatrix, y: &[f64], folds: &Folds) -> Result<Selection> {
        if features.is_empty() {
            return Err(DbdError::Training("no candidate features to select from".into()));
        }
        if x.n_rows() != y.len() || folds.n_points() != y.len() {
            return Err(DbdError::InvalidParameter(format!(
                "{} rows, {} responses and {} fold labels disagree",
                x.n_rows(),
                y.len(),
                folds.n_points()
            )));
        }
        if self.params.mtry_grid.is_empty() {
            return Err(DbdError::InvalidParameter("mtry grid is empty".into()));
        }
        for f in features {
            if x.column_index(f).is_none() {
                return Err(DbdError::MissingBand(f.clone()));
            }
        }

        info!(
            "forward selection over {} features, {} folds, {} workers",
            features.len(),
            folds.k,
            rayon::current_num_threads()
        );

        let mut selected: Vec<String> = Vec::new();
        let mut accepted_best: Option<Scored> = None;
        let mut history = Vec::new();
        let mut models_evaluated = 0usize;
        let mut warning = None;

        loop {
            let round = history.len() + 1;
            let remaining: Vec<&String> = features.iter().filter(|f| !selected.contains(f)).collect();
            if remaining.is_empty() {
                break;
            }
            let grid = clip_mtry_grid(&self.params.mtry_grid, selected.len() + 1);
            let candidates: Vec<(String, usize)> = remaining
                .iter()
                .flat_map(|f| grid.iter().map(move |&m| ((*f).clone(), m)))
                .collect();

            let scored: Vec<Scored> = candidates
                .par_iter()
                .map(|(feature, mtry)| {
                    let mut subset = selected.clone();
                    subset.push(feature.clone());
                    let metrics = self.cross_validate(&subset, *mtry, x, y, folds)?;
                    debug!("round {round}: {subset:?} mtry {mtry} → R² {:.4}", metrics.r2);
                    Ok(Scored { feature: feature.clone(), mtry: *mtry, metrics })
                })
                .collect::<Result<Vec<_>>>()?;
            let round_fits = candidates.len() * folds.k;
            models_evaluated += round_fits;

            let Some(best) = round_best(scored) else { break };
            let improves = match &accepted_best {
                None => true,
                Some(prev) => best.metrics.rank_score() > prev.metrics.rank_score(),
            };

            if round == 1 && best.metrics.rank_score() <= self.params.baseline_r2 {
                warn!(
                    "no single feature beats baseline R² {:.3}; keeping `{}` (R² {:.3}) as unvalidated",
                    self.params.baseline_r2, best.feature, best.metrics.r2
                );
                warning = Some(DbdError::NoFeatureImproves {
                    baseline: self.params.baseline_r2,
                    best_feature: best.feature.clone(),
                    best_r2: best.metrics.r2,
                });
            }

            info!(
                "round {round}: best `{}` mtry {} R² {:.4} RMSE {:.4} ({} candidates, {models_evaluated} fits so far){}",
                best.feature,
                best.mtry,
                best.metrics.r2,
                best.metrics.rmse,
                candidates.len(),
                if improves { "" } else { ", not accepted" }
            );
            history.push(RoundRecord {
                round,
                feature: best.feature.clone(),
                mtry: best.mtry,
                r2: best.metrics.r2,
                rmse: best.metrics.rmse,
                me: best.metrics.me,
                accepted: improves,
                models_evaluated: round_fits,
            });

            if !improves {
                break;
            }
            selected.push(best.feature.clone());
            accepted_best = Some(best);
            if warning.is_some() {
                break;
            }
        }

        let best = accepted_best.ok_or_else(|| DbdError::Training("selection produced no candidate".into()))?;
        let final_x = x.select_columns(&selected)?;
        let forest = QuantileForest::fit(&final_x, y, self.forest_params(best.mtry, 0))?;
        info!("selected {:?} with mtry {} (CV R² {:.4})", selected, best.mtry, best.metrics.r2);

        Ok(Selection {
            model: SelectedModel {
                features: selected,
                mtry: best.mtry,
                forest,
                cv: best.metrics,
                validated: warning.is_none(),
            },
            history,
            models_evaluated,
            warning,
        })
    }

    /// Pooled out-of-fold 0.5-quantile predictions for one candidate.
    fn cross_validate(
        &self,
        subset: &[String],
        mtry: usize,
        x: &FeatureMatrix,
        y: &[f64],
        folds: &Folds,
    ) -> Result<CvMetrics> {
        let xs = x.select_columns(subset)?;
        let mut predicted = vec![f64::NAN; y.len()];
        for f in 0..folds.k {
            let train = &folds.train[f];
            let x_train = xs.select_rows(train);
            let y_train: Vec<f64> = train.iter().map(|&i| y[i]).collect();
            let forest = QuantileForest::fit(&x_train, &y_train, self.forest_params(mtry, f as u64 + 1))?;
            for &i in &folds.test[f] {
                predicted[i] = forest.predict_quantile(xs.row(i), 0.5);
            }
        }
        Ok(CvMetrics::compute(&predicted, y))
    }

    fn forest_params(&self, mtry: usize, salt: u64) -> ForestParams {
        ForestParams {
            n_trees: self.params.n_trees,
            mtry,
            min_node_size: self.params.min_node_size,
            seed: self.params.seed ^ salt.wrapping_mul(0xA24B_AED4_963E_E407),
        }
    }
}

/// Grid values in `1..=subset_size`, ascending and unique; falls back to
/// `subset_size` when nothing in the grid fits.
pub fn clip_mtry_grid(grid: &[usize], subset_size: usize) -> Vec<usize> {
    let mut out: Vec<usize> = grid.iter().copied().filter(|&m| m >= 1 && m <= subset_size).collect();
    out.sort_unstable();
    out.dedup();
    if out.is_empty() {
        out.push(subset_size.max(1));
    }
    out
}

/// Highest R²; ties go to the lower mtry, then the lexicographically first
/// feature name.
fn round_best(scored: Vec<Scored>) -> Option<Scored> {
    scored.into_iter().reduce(|best, c| {
        let (a, b) = (c.metrics.rank_score(), best.metrics.rank_score());
        let better = a > b || (a == b && (c.mtry, &c.feature) < (best.mtry, &best.feature));
        if better {
            c
        } else {
            best
        }
    })
}
